pub mod access_control;
pub mod ast_filter;
pub mod policy;
pub mod query_guards;
pub mod user_manager;

pub use access_control::*;
pub use ast_filter::*;
pub use policy::*;
pub use query_guards::*;
pub use user_manager::*;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which row-filter rewrite the query service applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterStrategy {
    /// Keyword-position text splice ([`FilterInjector`]).
    #[default]
    Textual,
    /// Parse, add the predicate to the outermost query, re-print ([`AstFilterInjector`]).
    Ast,
}

impl FromStr for FilterStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "textual" | "text" => Ok(FilterStrategy::Textual),
            "ast" => Ok(FilterStrategy::Ast),
            other => Err(format!("unknown filter strategy '{}'", other)),
        }
    }
}

/// Row-filter rewriter selected by [`FilterStrategy`].
#[derive(Debug, Clone)]
pub struct ScopeFilter {
    strategy: FilterStrategy,
    textual: FilterInjector,
    ast: AstFilterInjector,
}

impl ScopeFilter {
    pub fn new(strategy: FilterStrategy, qualification: Qualification) -> Self {
        Self {
            strategy,
            textual: FilterInjector::new(qualification),
            ast: AstFilterInjector::new(),
        }
    }

    pub fn strategy(&self) -> FilterStrategy {
        self.strategy
    }

    pub fn apply(&self, sql: &str, scope: &AccessScope) -> Result<String> {
        match self.strategy {
            FilterStrategy::Textual => Ok(self.textual.inject(sql, scope)),
            FilterStrategy::Ast => self.ast.inject(sql, scope),
        }
    }
}

impl Default for ScopeFilter {
    fn default() -> Self {
        Self::new(FilterStrategy::default(), Qualification::default())
    }
}
