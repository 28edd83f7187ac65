//! Query Guards
//!
//! Statement-type validation for generated SQL before it reaches the
//! database: exactly one statement, and it must be a read-only query.

use crate::error::{EduError, Result};
use sqlparser::ast::Statement;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use tracing::warn;

/// Query guards configuration
#[derive(Debug, Clone)]
pub struct QueryGuard {
    pub max_sql_length: usize,
}

impl Default for QueryGuard {
    fn default() -> Self {
        Self {
            max_sql_length: 20_000,
        }
    }
}

impl QueryGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept only a single SELECT-style query.
    pub fn validate(&self, sql: &str) -> Result<()> {
        if sql.trim().is_empty() {
            return Err(EduError::StatementRejected("empty SQL".to_string()));
        }

        if sql.len() > self.max_sql_length {
            return Err(EduError::StatementRejected(format!(
                "SQL is {} bytes long (max: {})",
                sql.len(),
                self.max_sql_length
            )));
        }

        let statements = Parser::parse_sql(&SQLiteDialect {}, sql)
            .map_err(|e| EduError::SqlParse(e.to_string()))?;

        match statements.as_slice() {
            [Statement::Query(_)] => Ok(()),
            [] => Err(EduError::StatementRejected("no statement found".to_string())),
            [other] => {
                let keyword = other
                    .to_string()
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_uppercase();
                warn!(statement = %keyword, "Rejected non-query statement");
                Err(EduError::StatementRejected(format!(
                    "only SELECT queries are allowed, got {}",
                    keyword
                )))
            }
            many => {
                warn!(count = many.len(), "Rejected multi-statement SQL");
                Err(EduError::StatementRejected(format!(
                    "expected one statement, found {}",
                    many.len()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_select_and_cte() {
        let guard = QueryGuard::new();
        assert!(guard.validate("SELECT * FROM students").is_ok());
        assert!(guard
            .validate("WITH low AS (SELECT * FROM students WHERE attendance_percentage < 80) SELECT COUNT(*) FROM low")
            .is_ok());
        assert!(guard
            .validate("SELECT grade, COUNT(*) FROM students GROUP BY grade ORDER BY grade LIMIT 5")
            .is_ok());
    }

    #[test]
    fn test_rejects_writes() {
        let guard = QueryGuard::new();
        for sql in [
            "DELETE FROM students",
            "UPDATE students SET grade = 'Grade 6'",
            "DROP TABLE students",
            "INSERT INTO students (student_id) VALUES (1)",
        ] {
            assert!(
                matches!(guard.validate(sql), Err(EduError::StatementRejected(_))),
                "{} should be rejected",
                sql
            );
        }
    }

    #[test]
    fn test_rejects_stacked_statements() {
        let err = QueryGuard::new()
            .validate("SELECT * FROM students; DROP TABLE students")
            .unwrap_err();
        assert!(matches!(err, EduError::StatementRejected(_)));
    }

    #[test]
    fn test_rejects_empty_and_garbage() {
        let guard = QueryGuard::new();
        assert!(matches!(guard.validate("   "), Err(EduError::StatementRejected(_))));
        assert!(matches!(
            guard.validate("Here are the students you asked for"),
            Err(EduError::SqlParse(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_sql() {
        let guard = QueryGuard { max_sql_length: 10 };
        assert!(guard.validate("SELECT * FROM students").is_err());
    }
}
