//! Runtime configuration read from the environment (and `.env`).

use crate::error::{EduError, Result};
use crate::security::{FilterStrategy, Qualification};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_DATABASE_PATH: &str = "edu_query.db";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Placeholder key that means "no LLM available, use templates".
const DUMMY_API_KEY: &str = "dummy-api-key";

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `None` selects the keyword template generator.
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub database_path: PathBuf,
    pub data_dir: PathBuf,
    pub server_addr: SocketAddr,
    pub filter_strategy: FilterStrategy,
    pub qualification: Qualification,
    /// JSON-lines audit file; in-memory only when unset.
    pub audit_log: Option<PathBuf>,
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let openai_api_key = get("OPENAI_API_KEY").filter(|key| key != DUMMY_API_KEY);

        let server_addr = get("EDU_SERVER_ADDR")
            .unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| EduError::Config(format!("invalid EDU_SERVER_ADDR: {}", e)))?;

        let filter_strategy = match get("EDU_FILTER_STRATEGY") {
            Some(raw) => raw.parse().map_err(EduError::Config)?,
            None => FilterStrategy::default(),
        };

        let qualification = match get("EDU_FILTER_QUALIFIER") {
            Some(raw) => raw.parse().map_err(EduError::Config)?,
            None => Qualification::default(),
        };

        Ok(Self {
            openai_api_key,
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            database_path: get("EDU_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
            data_dir: get("EDU_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            server_addr,
            filter_strategy,
            qualification,
            audit_log: get("EDU_AUDIT_LOG").map(PathBuf::from),
        })
    }

    /// User-role table inside the data directory.
    pub fn admin_users_path(&self) -> PathBuf {
        self.data_dir.join("admin_users.csv")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.openai_model, DEFAULT_MODEL);
        assert_eq!(config.database_path, PathBuf::from(DEFAULT_DATABASE_PATH));
        assert_eq!(config.server_addr.port(), 8080);
        assert_eq!(config.filter_strategy, FilterStrategy::Textual);
        assert_eq!(config.qualification, Qualification::DetectStudentsAlias);
        assert_eq!(config.admin_users_path(), PathBuf::from("data/admin_users.csv"));
    }

    #[test]
    fn test_dummy_and_blank_keys_disable_llm() {
        assert!(config_from(&[("OPENAI_API_KEY", "dummy-api-key")])
            .unwrap()
            .openai_api_key
            .is_none());
        assert!(config_from(&[("OPENAI_API_KEY", "  ")])
            .unwrap()
            .openai_api_key
            .is_none());
        assert_eq!(
            config_from(&[("OPENAI_API_KEY", "sk-test")]).unwrap().openai_api_key.as_deref(),
            Some("sk-test")
        );
    }

    #[test]
    fn test_filter_settings() {
        let config = config_from(&[
            ("EDU_FILTER_STRATEGY", "ast"),
            ("EDU_FILTER_QUALIFIER", "s"),
            ("EDU_AUDIT_LOG", "/tmp/audit.jsonl"),
        ])
        .unwrap();
        assert_eq!(config.filter_strategy, FilterStrategy::Ast);
        assert_eq!(config.qualification, Qualification::Alias("s".to_string()));
        assert_eq!(config.audit_log, Some(PathBuf::from("/tmp/audit.jsonl")));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        assert!(matches!(
            config_from(&[("EDU_FILTER_STRATEGY", "regex")]),
            Err(EduError::Config(_))
        ));
        assert!(matches!(
            config_from(&[("EDU_SERVER_ADDR", "not-an-addr")]),
            Err(EduError::Config(_))
        ));
    }
}
