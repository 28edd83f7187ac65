//! AST Filter Injection
//!
//! Parser-based variant of the row filter. The statement is parsed with
//! `sqlparser`, the scope predicate is ANDed into the `WHERE` of the
//! outermost query, and the tree is printed back to SQL. Subqueries are left
//! alone, so a `WHERE` inside them can no longer capture the filter.

use crate::error::{EduError, Result};
use crate::security::policy::{AccessScope, Dimension};
use sqlparser::ast::{
    BinaryOperator, Expr, Ident, Select, SetExpr, Statement, TableFactor, TableWithJoins, Value,
};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use tracing::{debug, warn};

const STUDENTS_TABLE: &str = "students";

#[derive(Debug, Clone, Default)]
pub struct AstFilterInjector;

impl AstFilterInjector {
    pub fn new() -> Self {
        Self
    }

    /// Rewrite `sql` so the outermost query only returns rows inside `scope`.
    ///
    /// Fails on text that does not parse, on more than one statement, and on
    /// anything other than a query.
    pub fn inject(&self, sql: &str, scope: &AccessScope) -> Result<String> {
        if !scope.restricts_rows() {
            return Ok(sql.to_string());
        }

        let mut statements = Parser::parse_sql(&SQLiteDialect {}, sql)
            .map_err(|e| EduError::SqlParse(e.to_string()))?;
        if statements.len() != 1 {
            return Err(EduError::StatementRejected(format!(
                "expected exactly one statement, found {}",
                statements.len()
            )));
        }

        let mut statement = statements.remove(0);
        match &mut statement {
            Statement::Query(query) => {
                if !apply_to_set_expr(&mut query.body, scope) {
                    return Err(EduError::StatementRejected(
                        "query has no SELECT body to filter".to_string(),
                    ));
                }
            }
            other => {
                return Err(EduError::StatementRejected(format!(
                    "only SELECT queries can be scoped, got: {}",
                    statement_keyword(other)
                )));
            }
        }

        let rewritten = statement.to_string();
        debug!(sql = %rewritten, "Injected row filter into query AST");
        Ok(rewritten)
    }
}

fn statement_keyword(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

/// Apply the filter to every SELECT that makes up the outermost query.
fn apply_to_set_expr(body: &mut SetExpr, scope: &AccessScope) -> bool {
    match body {
        SetExpr::Select(select) => {
            apply_to_select(select, scope);
            true
        }
        SetExpr::Query(query) => apply_to_set_expr(&mut query.body, scope),
        SetExpr::SetOperation { left, right, .. } => {
            let left_applied = apply_to_set_expr(left, scope);
            let right_applied = apply_to_set_expr(right, scope);
            left_applied && right_applied
        }
        _ => false,
    }
}

fn apply_to_select(select: &mut Select, scope: &AccessScope) {
    let qualifier = match students_qualifier(&select.from) {
        Some(qualifier) => qualifier,
        None => {
            // No students relation: filter unqualified so access never widens.
            warn!("No students table in outermost query; applying unqualified scope filter");
            None
        }
    };

    let Some(predicate) = scope_predicate(scope, qualifier.as_ref()) else {
        return;
    };

    select.selection = Some(match select.selection.take() {
        Some(existing) => Expr::BinaryOp {
            left: Box::new(Expr::Nested(Box::new(predicate))),
            op: BinaryOperator::And,
            right: Box::new(Expr::Nested(Box::new(existing))),
        },
        None => predicate,
    });
}

/// Locate the students relation among the FROM items and their joins.
///
/// Outer `None`: no students relation. Inner `None`: it is the only
/// relation and has no alias, so columns stay unqualified.
fn students_qualifier(from: &[TableWithJoins]) -> Option<Option<Ident>> {
    let relation_count: usize = from.iter().map(|t| 1 + t.joins.len()).sum();

    from.iter()
        .flat_map(|t| std::iter::once(&t.relation).chain(t.joins.iter().map(|j| &j.relation)))
        .find_map(|relation| match relation {
            TableFactor::Table { name, alias, .. } => {
                let table = name.0.last()?;
                if !table.value.eq_ignore_ascii_case(STUDENTS_TABLE) {
                    return None;
                }
                Some(match alias {
                    Some(alias) => Some(alias.name.clone()),
                    None if relation_count > 1 => Some(table.clone()),
                    None => None,
                })
            }
            _ => None,
        })
}

fn scope_predicate(scope: &AccessScope, qualifier: Option<&Ident>) -> Option<Expr> {
    Dimension::ORDERED
        .iter()
        .filter_map(|dimension| {
            let values = scope.dimension(*dimension).values()?;
            let column = Ident::new(dimension.column());
            let column = match qualifier {
                Some(q) => Expr::CompoundIdentifier(vec![q.clone(), column]),
                None => Expr::Identifier(column),
            };
            Some(Expr::InList {
                expr: Box::new(column),
                list: values
                    .iter()
                    .map(|v| Expr::Value(Value::SingleQuotedString(v.clone())))
                    .collect(),
                negated: false,
            })
        })
        .reduce(|acc, condition| Expr::BinaryOp {
            left: Box::new(acc),
            op: BinaryOperator::And,
            right: Box::new(condition),
        })
}
