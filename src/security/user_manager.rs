//! User Directory
//!
//! Read-only user-role table loaded once per process and handed to the
//! services that need it. Resolves usernames to access scopes.

use crate::error::{EduError, Result};
use crate::security::policy::{AccessScope, UserRecord};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// User-role table indexed by username.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: Vec<UserRecord>,
    by_username: HashMap<String, usize>,
}

impl UserDirectory {
    /// Build a directory from records. The first record wins on duplicate usernames.
    pub fn from_records(users: Vec<UserRecord>) -> Self {
        let mut by_username = HashMap::with_capacity(users.len());
        for (idx, user) in users.iter().enumerate() {
            by_username.entry(user.username.clone()).or_insert(idx);
        }
        Self { users, by_username }
    }

    /// Load the table from CSV text with a header row.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let mut users = Vec::new();
        for record in rdr.deserialize::<UserRecord>() {
            users.push(record?);
        }

        Ok(Self::from_records(users))
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            EduError::Config(format!("Failed to open user table {}: {}", path.display(), e))
        })?;
        let directory = Self::from_reader(file)?;
        info!("Loaded {} user-role records from {}", directory.len(), path.display());
        Ok(directory)
    }

    /// Resolve a username to its access scope.
    ///
    /// Matching is exact. An unknown user yields [`EduError::UserNotFound`],
    /// which callers must treat as "no access" rather than a retryable fault.
    pub fn resolve(&self, username: &str) -> Result<AccessScope> {
        let user = self
            .get(username)
            .ok_or_else(|| EduError::UserNotFound(username.to_string()))?;
        let scope = user.to_scope();
        debug!(username, role = %user.role, unrestricted = scope.unrestricted, "Resolved access scope");
        Ok(scope)
    }

    pub fn get(&self, username: &str) -> Option<&UserRecord> {
        self.by_username.get(username).map(|idx| &self.users[*idx])
    }

    /// All records in source order.
    pub fn list(&self) -> &[UserRecord] {
        &self.users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::policy::{Role, ScopeValues};

    const USERS_CSV: &str = "\
admin_id,username,email,full_name,role,assigned_grades,assigned_sections,assigned_regions,created_date
1,super_admin,super.admin@school.edu,Super Administrator,super_admin,ALL,ALL,ALL,2024-01-01
2,priya_sharma,priya.sharma@school.edu,Priya Sharma,grade_coordinator,Grade 6,ALL,North Delhi,2024-01-15
3,teacher_grade6a,teacher.grade6a@school.edu,Diya Gupta,section_teacher,Grade 6,A,\"North Delhi, South Delhi\",2024-02-01
";

    fn directory() -> UserDirectory {
        UserDirectory::from_reader(USERS_CSV.as_bytes()).unwrap()
    }

    #[test]
    fn test_load_from_csv() {
        let dir = directory();
        assert_eq!(dir.len(), 3);
        assert_eq!(dir.get("priya_sharma").unwrap().full_name, "Priya Sharma");
        assert_eq!(dir.get("t1").unwrap().role, Role::SectionTeacher);
    }

    #[test]
    fn test_minimal_columns_are_enough() {
        let csv = "username,role,assigned_grades,assigned_sections,assigned_regions,full_name\n\
                   t1,section_teacher,Grade 7,B,ALL,Teacher One\n";
        let dir = UserDirectory::from_reader(csv.as_bytes()).unwrap();
        let user = dir.get("t1").unwrap();
        assert_eq!(user.admin_id, None);
        assert_eq!(user.role, Role::SectionTeacher);
    }

    #[test]
    fn test_unknown_role_fails_to_load() {
        let csv = "username,role,assigned_grades,assigned_sections,assigned_regions,full_name\n\
                   x,principal,ALL,ALL,ALL,X\n";
        assert!(matches!(
            UserDirectory::from_reader(csv.as_bytes()),
            Err(EduError::Csv(_))
        ));
    }

    #[test]
    fn test_resolve_super_admin_is_unrestricted() {
        let scope = directory().resolve("super_admin").unwrap();
        assert!(scope.unrestricted);
    }

    #[test]
    fn test_resolve_splits_and_trims_lists() {
        let scope = directory().resolve("teacher_grade6a").unwrap();
        assert!(!scope.unrestricted);
        assert_eq!(scope.grades, ScopeValues::only(["Grade 6"]));
        assert_eq!(scope.sections, ScopeValues::only(["A"]));
        assert_eq!(scope.regions, ScopeValues::only(["North Delhi", "South Delhi"]));
    }

    #[test]
    fn test_resolve_keeps_all_sentinel() {
        let scope = directory().resolve("priya_sharma").unwrap();
        assert_eq!(scope.sections, ScopeValues::All);
        assert_eq!(scope.grades, ScopeValues::only(["Grade 6"]));
    }

    #[test]
    fn test_resolve_unknown_user_is_not_found() {
        let err = directory().resolve("nonexistent_user").unwrap_err();
        assert!(matches!(err, EduError::UserNotFound(ref name) if name == "nonexistent_user"));
        assert!(err.is_access_denial());
    }

    #[test]
    fn test_resolve_is_exact_match() {
        assert!(directory().resolve("Super_Admin").is_err());
        assert!(directory().resolve(" super_admin").is_err());
    }
}
