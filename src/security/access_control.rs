//! Access Control
//!
//! Row-level scope enforcement by rewriting generated SQL text.
//!
//! The rewrite is purely textual: it looks for keywords, never parses the
//! statement, and cannot fail. A statement it mangles is only discovered
//! when the database tries to execute it. [`crate::security::ast_filter`]
//! holds the parser-based alternative.

use crate::security::policy::{AccessScope, Dimension};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

lazy_static! {
    static ref WHERE_KEYWORD: Regex = Regex::new(r"(?i)\bWHERE\b").unwrap();
    static ref FROM_STUDENTS: Regex = Regex::new(r"(?i)\bFROM\s+students\b").unwrap();
    static ref STUDENTS_RELATION: Regex = Regex::new(r"(?i)\b(?:FROM|JOIN)\s+students\b").unwrap();
    static ref ALIAS_TOKEN: Regex =
        Regex::new(r"^\s+(?:(?i:AS)\s+)?([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    static ref TRAILING_CLAUSES: Vec<Regex> = [
        r"(?i)\bORDER\s+BY\b",
        r"(?i)\bGROUP\s+BY\b",
        r"(?i)\bHAVING\b",
        r"(?i)\bLIMIT\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();
}

/// Words that may follow a table reference but are never an alias.
const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET", "JOIN", "INNER", "LEFT", "RIGHT",
    "FULL", "CROSS", "OUTER", "NATURAL", "ON", "USING", "UNION", "EXCEPT", "INTERSECT", "WINDOW",
];

/// How the `grade`, `section` and `region` columns are written in the filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Qualification {
    /// `grade IN (...)`
    Unqualified,
    /// Always prefix with the given qualifier, e.g. `s.grade IN (...)`.
    Alias(String),
    /// Prefix with the alias the statement gives `students`, if any.
    #[default]
    DetectStudentsAlias,
}

impl FromStr for Qualification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "detect" => Ok(Qualification::DetectStudentsAlias),
            "none" | "unqualified" => Ok(Qualification::Unqualified),
            alias if alias.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') => {
                Ok(Qualification::Alias(alias.to_string()))
            }
            other => Err(format!("invalid column qualifier '{}'", other)),
        }
    }
}

/// Build the filter clause for a scope: one `IN` condition per restricted
/// dimension, joined with `AND`. Returns `None` when nothing is restricted.
pub fn build_filter_clause(scope: &AccessScope, qualifier: Option<&str>) -> Option<String> {
    if scope.unrestricted {
        return None;
    }

    let prefix = qualifier.map(|q| format!("{}.", q)).unwrap_or_default();
    let conditions: Vec<String> = Dimension::ORDERED
        .iter()
        .filter_map(|dimension| {
            let values = scope.dimension(*dimension).values()?;
            let quoted = values.iter().map(|v| quote_literal(v)).join(",");
            Some(format!("{}{} IN ({})", prefix, dimension.column(), quoted))
        })
        .collect();

    if conditions.is_empty() {
        None
    } else {
        Some(conditions.join(" AND "))
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Alias given to the `students` table in `FROM students s` / `JOIN students AS s`.
pub fn detect_students_alias(sql: &str) -> Option<String> {
    STUDENTS_RELATION
        .find_iter(sql)
        .find_map(|m| alias_after(sql, m.end()).map(|(alias, _)| alias))
}

/// Alias token starting at `pos`, with the byte offset where it ends.
fn alias_after(sql: &str, pos: usize) -> Option<(String, usize)> {
    let caps = ALIAS_TOKEN.captures(&sql[pos..])?;
    let token = caps.get(1)?;
    if CLAUSE_KEYWORDS
        .iter()
        .any(|kw| kw.eq_ignore_ascii_case(token.as_str()))
    {
        return None;
    }
    let end = caps.get(0).map(|m| pos + m.end())?;
    Some((token.as_str().to_string(), end))
}

/// Textual query filter injector.
#[derive(Debug, Clone, Default)]
pub struct FilterInjector {
    qualification: Qualification,
}

impl FilterInjector {
    pub fn new(qualification: Qualification) -> Self {
        Self { qualification }
    }

    /// Restrict `sql` to the rows visible under `scope`.
    ///
    /// Placement, first match wins:
    /// 1. an existing `WHERE`: the filter goes right after its first occurrence,
    ///    parenthesised and followed by `AND`;
    /// 2. `FROM students [alias]`: a new `WHERE` follows the table reference;
    /// 3. otherwise a new `WHERE` goes before the earliest `ORDER BY`,
    ///    `GROUP BY`, `HAVING` or `LIMIT`, or at the end.
    ///
    /// Not idempotent: a second call nests another copy of the filter.
    pub fn inject(&self, sql: &str, scope: &AccessScope) -> String {
        if scope.unrestricted {
            return sql.to_string();
        }

        let qualifier = match &self.qualification {
            Qualification::Unqualified => None,
            Qualification::Alias(alias) => Some(alias.clone()),
            Qualification::DetectStudentsAlias => detect_students_alias(sql),
        };

        let filter = match build_filter_clause(scope, qualifier.as_deref()) {
            Some(filter) => filter,
            None => return sql.to_string(),
        };

        let rewritten = if let Some(m) = WHERE_KEYWORD.find(sql) {
            format!(
                "{}{} ({}) AND {}",
                &sql[..m.start()],
                m.as_str(),
                filter,
                sql[m.end()..].trim_start()
            )
        } else if let Some(m) = FROM_STUDENTS.find(sql) {
            let end = alias_after(sql, m.end()).map(|(_, end)| end).unwrap_or(m.end());
            format!("{} WHERE {}{}", &sql[..end], filter, &sql[end..])
        } else {
            let insert_pos = TRAILING_CLAUSES
                .iter()
                .filter_map(|re| re.find(sql).map(|m| m.start()))
                .min();
            match insert_pos {
                Some(pos) => format!("{} WHERE {} {}", sql[..pos].trim_end(), filter, &sql[pos..]),
                None => format!("{} WHERE {}", sql.trim_end(), filter),
            }
        };

        debug!(filter = %filter, "Injected row filter");
        rewritten
    }
}
