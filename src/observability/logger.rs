//! Execution Logger
//!
//! Audit trail for scoped queries and access decisions, kept in a bounded
//! in-memory buffer and optionally appended to JSON-lines files.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// One answered (or failed) question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub timestamp: DateTime<Utc>,
    pub query_id: String,
    pub username: String,
    pub user_role: Option<String>,
    pub question: String,
    pub generator: String,
    pub generated_sql: Option<String>,
    pub secured_sql: Option<String>,
    pub execution_time_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
    pub rows_returned: Option<u64>,
}

impl QueryLogEntry {
    pub fn new(username: &str, question: &str, generator: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            query_id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            user_role: None,
            question: question.to_string(),
            generator: generator.to_string(),
            generated_sql: None,
            secured_sql: None,
            execution_time_ms: 0,
            success: false,
            error_message: None,
            rows_returned: None,
        }
    }
}

/// Outcome of a permission lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessControlLog {
    pub timestamp: DateTime<Utc>,
    pub username: String,
    pub user_role: Option<String>,
    pub access_granted: bool,
    /// Human-readable scope, e.g. `grade IN ('Grade 6')`.
    pub scope: Option<String>,
    pub reason: Option<String>,
}

pub struct ExecutionLogger {
    log_file: Option<PathBuf>,
    query_logs: Arc<Mutex<VecDeque<QueryLogEntry>>>,
    access_logs: Arc<Mutex<VecDeque<AccessControlLog>>>,
    max_in_memory_logs: usize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn push_bounded<T>(logs: &Mutex<VecDeque<T>>, entry: T, max: usize) {
    let mut logs = lock(logs);
    logs.push_back(entry);
    while logs.len() > max {
        logs.pop_front();
    }
}

impl ExecutionLogger {
    /// `log_file` receives query entries; access entries go to
    /// `access_control.log` next to it.
    pub fn new(log_file: Option<PathBuf>, max_in_memory_logs: usize) -> Self {
        Self {
            log_file,
            query_logs: Arc::new(Mutex::new(VecDeque::new())),
            access_logs: Arc::new(Mutex::new(VecDeque::new())),
            max_in_memory_logs,
        }
    }

    pub fn log_query(&self, entry: QueryLogEntry) -> Result<()> {
        push_bounded(&self.query_logs, entry.clone(), self.max_in_memory_logs);

        if let Some(ref log_file) = self.log_file {
            append_json_line(log_file, &entry)?;
        }
        Ok(())
    }

    pub fn log_access_control(&self, entry: AccessControlLog) -> Result<()> {
        push_bounded(&self.access_logs, entry.clone(), self.max_in_memory_logs);

        if let Some(path) = self.access_log_path() {
            append_json_line(&path, &entry)?;
        }
        Ok(())
    }

    /// Record without failing the caller; write errors are only warned about.
    pub fn record_query(&self, entry: QueryLogEntry) {
        if let Err(e) = self.log_query(entry) {
            warn!("Failed to write query audit log: {}", e);
        }
    }

    pub fn record_access(&self, entry: AccessControlLog) {
        if let Err(e) = self.log_access_control(entry) {
            warn!("Failed to write access audit log: {}", e);
        }
    }

    fn access_log_path(&self) -> Option<PathBuf> {
        self.log_file.as_ref().map(|log_file| {
            log_file
                .parent()
                .map(|p| p.join("access_control.log"))
                .unwrap_or_else(|| PathBuf::from("access_control.log"))
        })
    }

    /// Most recent first.
    pub fn get_recent_queries(&self, limit: usize) -> Vec<QueryLogEntry> {
        lock(&self.query_logs).iter().rev().take(limit).cloned().collect()
    }

    /// (granted, denied)
    pub fn get_access_stats(&self) -> (u64, u64) {
        let logs = lock(&self.access_logs);
        let granted = logs.iter().filter(|l| l.access_granted).count() as u64;
        (granted, logs.len() as u64 - granted)
    }

    pub fn export_logs(&self) -> Result<String> {
        let query_logs: Vec<_> = lock(&self.query_logs).iter().cloned().collect();
        let access_logs: Vec<_> = lock(&self.access_logs).iter().cloned().collect();

        let export = serde_json::json!({
            "query_logs": query_logs,
            "access_logs": access_logs,
            "exported_at": Utc::now().to_rfc3339()
        });

        Ok(serde_json::to_string_pretty(&export)?)
    }
}

fn append_json_line<T: Serialize>(path: &Path, entry: &T) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let json = serde_json::to_string(entry)?;
    writeln!(file, "{}", json)?;
    Ok(())
}

impl Default for ExecutionLogger {
    fn default() -> Self {
        Self::new(None, 1000)
    }
}
