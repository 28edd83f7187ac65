use thiserror::Error;

#[derive(Error, Debug)]
pub enum EduError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// No user-role record matches the username. Callers deny access outright.
    #[error("User '{0}' not found or access denied")]
    UserNotFound(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("SQL parse error: {0}")]
    SqlParse(String),

    #[error("Statement rejected: {0}")]
    StatementRejected(String),

    /// Carries the SQLite message verbatim so it can be shown to the end user.
    #[error("Database error: {0}")]
    Database(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Query template error: {0}")]
    Template(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EduError {
    /// True when the error means "this caller gets nothing", as opposed to a fault.
    pub fn is_access_denial(&self) -> bool {
        matches!(self, EduError::UserNotFound(_))
    }
}

impl From<rusqlite::Error> for EduError {
    fn from(e: rusqlite::Error) -> Self {
        EduError::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EduError>;
