//! Security Policy Definitions
//!
//! User-role records as stored in the admin CSV and the access scope derived
//! from them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Sentinel stored in a scope column meaning "no restriction on this dimension".
pub const ALL_SENTINEL: &str = "ALL";

/// User role for access control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    GradeCoordinator,
    SectionTeacher,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::GradeCoordinator => "grade_coordinator",
            Role::SectionTeacher => "section_teacher",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "super_admin" => Ok(Role::SuperAdmin),
            "grade_coordinator" => Ok(Role::GradeCoordinator),
            "section_teacher" => Ok(Role::SectionTeacher),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// One row of the user-role table.
///
/// The scope columns hold either [`ALL_SENTINEL`] or a comma-separated list
/// such as `"Grade 6,Grade 7"`. The trailing optional columns exist in the
/// generated dataset but are not needed for access decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<u32>,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub full_name: String,
    pub role: Role,
    pub assigned_grades: String,
    pub assigned_sections: String,
    pub assigned_regions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<String>,
}

impl UserRecord {
    pub fn new(
        username: impl Into<String>,
        full_name: impl Into<String>,
        role: Role,
        assigned_grades: impl Into<String>,
        assigned_sections: impl Into<String>,
        assigned_regions: impl Into<String>,
    ) -> Self {
        Self {
            admin_id: None,
            username: username.into(),
            email: None,
            full_name: full_name.into(),
            role,
            assigned_grades: assigned_grades.into(),
            assigned_sections: assigned_sections.into(),
            assigned_regions: assigned_regions.into(),
            created_date: None,
        }
    }

    /// Derive a fresh access scope from this record.
    pub fn to_scope(&self) -> AccessScope {
        if self.role == Role::SuperAdmin {
            return AccessScope::unrestricted();
        }

        AccessScope {
            unrestricted: false,
            grades: ScopeValues::parse(&self.assigned_grades),
            sections: ScopeValues::parse(&self.assigned_sections),
            regions: ScopeValues::parse(&self.assigned_regions),
        }
    }
}

/// Allowed values along one scope dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeValues {
    All,
    Only(BTreeSet<String>),
}

impl ScopeValues {
    /// Parse a stored column value.
    ///
    /// Elements are trimmed but empty elements are kept, so `"A, "` yields
    /// `{"", "A"}` and the resulting filter matches rows with an empty value.
    pub fn parse(raw: &str) -> Self {
        if raw == ALL_SENTINEL {
            return ScopeValues::All;
        }
        ScopeValues::Only(raw.split(',').map(|v| v.trim().to_string()).collect())
    }

    pub fn only<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScopeValues::Only(values.into_iter().map(Into::into).collect())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, ScopeValues::All)
    }

    pub fn values(&self) -> Option<&BTreeSet<String>> {
        match self {
            ScopeValues::All => None,
            ScopeValues::Only(values) => Some(values),
        }
    }
}

/// Scope dimensions in the order their conditions are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Grade,
    Section,
    Region,
}

impl Dimension {
    pub const ORDERED: [Dimension; 3] = [Dimension::Grade, Dimension::Section, Dimension::Region];

    /// Column name on the `students` table.
    pub fn column(&self) -> &'static str {
        match self {
            Dimension::Grade => "grade",
            Dimension::Section => "section",
            Dimension::Region => "region",
        }
    }
}

/// Access-scope descriptor produced by the permission resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessScope {
    pub unrestricted: bool,
    pub grades: ScopeValues,
    pub sections: ScopeValues,
    pub regions: ScopeValues,
}

impl AccessScope {
    pub fn unrestricted() -> Self {
        Self {
            unrestricted: true,
            grades: ScopeValues::All,
            sections: ScopeValues::All,
            regions: ScopeValues::All,
        }
    }

    pub fn restricted(grades: ScopeValues, sections: ScopeValues, regions: ScopeValues) -> Self {
        Self {
            unrestricted: false,
            grades,
            sections,
            regions,
        }
    }

    pub fn dimension(&self, dimension: Dimension) -> &ScopeValues {
        match dimension {
            Dimension::Grade => &self.grades,
            Dimension::Section => &self.sections,
            Dimension::Region => &self.regions,
        }
    }

    /// Whether any row filter has to be applied for this scope.
    pub fn restricts_rows(&self) -> bool {
        !self.unrestricted && Dimension::ORDERED.iter().any(|d| !self.dimension(*d).is_all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [Role::SuperAdmin, Role::GradeCoordinator, Role::SectionTeacher] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("principal".parse::<Role>().is_err());
    }

    #[test]
    fn test_parse_scope_values() {
        assert_eq!(ScopeValues::parse("ALL"), ScopeValues::All);
        assert_eq!(
            ScopeValues::parse("Grade 6, Grade 7"),
            ScopeValues::only(["Grade 6", "Grade 7"])
        );
        // sentinel is matched exactly
        assert_eq!(ScopeValues::parse("all"), ScopeValues::only(["all"]));
    }

    #[test]
    fn test_empty_elements_are_kept() {
        assert_eq!(ScopeValues::parse("A, ,B"), ScopeValues::only(["A", "", "B"]));
        assert_eq!(ScopeValues::parse(""), ScopeValues::only([""]));
    }

    #[test]
    fn test_super_admin_ignores_scope_columns() {
        let record = UserRecord::new("root", "Root", Role::SuperAdmin, "Grade 6", "A", "North Delhi");
        let scope = record.to_scope();
        assert!(scope.unrestricted);
        assert!(!scope.restricts_rows());
    }

    #[test]
    fn test_restricts_rows() {
        let open = AccessScope::restricted(ScopeValues::All, ScopeValues::All, ScopeValues::All);
        assert!(!open.restricts_rows());

        let narrow = AccessScope::restricted(ScopeValues::All, ScopeValues::only(["A"]), ScopeValues::All);
        assert!(narrow.restricts_rows());
    }
}
