pub mod api;
pub mod assistant;
pub mod config;
pub mod dataset;
pub mod db;
pub mod error;
pub mod llm;
pub mod observability;
pub mod query_templates;
pub mod security;

pub use assistant::{QueryAssistant, QueryOutcome};
pub use error::{EduError, Result};
