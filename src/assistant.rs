//! Query assistant
//!
//! Ties the pieces together for one request: resolve the caller's scope,
//! obtain SQL (generated or canned), clean and guard it, inject the scope
//! filter, run it read-only.

use crate::config::AppConfig;
use crate::db::{Database, QueryResult};
use crate::error::{EduError, Result};
use crate::llm::{clean_generated_sql, generator_for, SqlGenerator};
use crate::observability::{AccessControlLog, ExecutionLogger, QueryLogEntry};
use crate::query_templates::find_quick_query;
use crate::security::{build_filter_clause, AccessScope, FilterStrategy, QueryGuard, Role, ScopeFilter, UserDirectory, UserRecord};
use chrono::Utc;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use tracing::{info, warn};

/// Everything the caller sees for one answered question.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub question: String,
    pub generated_sql: String,
    pub secured_sql: String,
    pub result: QueryResult,
    /// Full name of the caller.
    pub user: String,
    pub role: Role,
}

pub struct QueryAssistant {
    users: UserDirectory,
    db: Mutex<Database>,
    generator: Box<dyn SqlGenerator>,
    guard: QueryGuard,
    filter: ScopeFilter,
    logger: ExecutionLogger,
    schema: String,
}

impl QueryAssistant {
    pub fn new(
        users: UserDirectory,
        db: Database,
        generator: Box<dyn SqlGenerator>,
        filter: ScopeFilter,
        logger: ExecutionLogger,
    ) -> Result<Self> {
        let schema = db.table_info()?;
        Ok(Self {
            users,
            db: Mutex::new(db),
            generator,
            guard: QueryGuard::new(),
            filter,
            logger,
            schema,
        })
    }

    /// Open the user table and database named by `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let users = UserDirectory::from_csv_path(config.admin_users_path())?;
        let db = Database::open_read_only(&config.database_path)?;
        let generator = generator_for(
            config.openai_api_key.clone(),
            config.openai_model.clone(),
            config.openai_base_url.clone(),
        );
        let filter = ScopeFilter::new(config.filter_strategy, config.qualification.clone());
        let logger = ExecutionLogger::new(config.audit_log.clone(), 1000);
        Self::new(users, db, generator, filter, logger)
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    pub fn logger(&self) -> &ExecutionLogger {
        &self.logger
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    pub fn filter_strategy(&self) -> FilterStrategy {
        self.filter.strategy()
    }

    /// Resolve `username`, recording the decision. Unknown users get
    /// [`EduError::UserNotFound`].
    pub fn authorize(&self, username: &str) -> Result<(&UserRecord, AccessScope)> {
        let resolved = self
            .users
            .resolve(username)
            .and_then(|scope| match self.users.get(username) {
                Some(user) => Ok((user, scope)),
                None => Err(EduError::UserNotFound(username.to_string())),
            });

        match &resolved {
            Ok((user, scope)) => self.logger.record_access(AccessControlLog {
                timestamp: Utc::now(),
                username: username.to_string(),
                user_role: Some(user.role.to_string()),
                access_granted: true,
                scope: Some(
                    build_filter_clause(scope, None).unwrap_or_else(|| "unrestricted".to_string()),
                ),
                reason: None,
            }),
            Err(e) => {
                warn!(username = %username, "Access denied: {}", e);
                self.logger.record_access(AccessControlLog {
                    timestamp: Utc::now(),
                    username: username.to_string(),
                    user_role: None,
                    access_granted: false,
                    scope: None,
                    reason: Some(e.to_string()),
                });
            }
        }

        resolved
    }

    /// Answer a natural-language question within the caller's scope.
    ///
    /// The caller is resolved before anything else; an unknown user never
    /// reaches the generator or the database.
    pub async fn ask(&self, question: &str, username: &str) -> Result<QueryOutcome> {
        let started = Instant::now();
        let mut entry = QueryLogEntry::new(username, question, self.generator.name());

        let outcome = self.ask_inner(question, username, &mut entry).await;
        self.finish(entry, started, &outcome);
        outcome
    }

    async fn ask_inner(
        &self,
        question: &str,
        username: &str,
        entry: &mut QueryLogEntry,
    ) -> Result<QueryOutcome> {
        let (user, scope) = self.authorize(username)?;
        entry.user_role = Some(user.role.to_string());

        let raw = self.generator.generate(question, &self.schema).await?;
        let generated_sql = clean_generated_sql(&raw);
        entry.generated_sql = Some(generated_sql.clone());

        self.run_scoped(question, generated_sql, user, &scope, entry)
    }

    /// Run a catalogue query by name within the caller's scope.
    pub fn run_quick_query(&self, name: &str, username: &str) -> Result<QueryOutcome> {
        let started = Instant::now();
        let mut entry = QueryLogEntry::new(username, name, "quick_query");

        let outcome = self.authorize(username).and_then(|(user, scope)| {
            entry.user_role = Some(user.role.to_string());
            let query = find_quick_query(name)?;
            entry.question = query.title.to_string();
            entry.generated_sql = Some(query.sql.to_string());
            self.run_scoped(query.title, query.sql.to_string(), user, &scope, &mut entry)
        });

        self.finish(entry, started, &outcome);
        outcome
    }

    /// Guard, scope and execute. Holds the database lock only here, never
    /// across an await.
    fn run_scoped(
        &self,
        question: &str,
        generated_sql: String,
        user: &UserRecord,
        scope: &AccessScope,
        entry: &mut QueryLogEntry,
    ) -> Result<QueryOutcome> {
        self.guard.validate(&generated_sql)?;

        let secured_sql = self.filter.apply(&generated_sql, scope)?;
        entry.secured_sql = Some(secured_sql.clone());

        let result = {
            let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
            db.execute(&secured_sql)?
        };

        info!(
            user = %user.username,
            role = %user.role,
            rows = result.row_count(),
            "Executed scoped query"
        );

        Ok(QueryOutcome {
            question: question.to_string(),
            generated_sql,
            secured_sql,
            result,
            user: user.full_name.clone(),
            role: user.role,
        })
    }

    fn finish(&self, mut entry: QueryLogEntry, started: Instant, outcome: &Result<QueryOutcome>) {
        entry.execution_time_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(outcome) => {
                entry.success = true;
                entry.rows_returned = Some(outcome.result.row_count() as u64);
            }
            Err(e) => {
                entry.success = false;
                entry.error_message = Some(e.to_string());
            }
        }
        self.logger.record_query(entry);
    }
}
