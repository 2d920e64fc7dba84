use thiserror::Error;

/// Setup failures that abort a run. Everything that goes wrong inside a
/// single unit of work is logged and counted instead.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid run parameters: {0}")]
    InvalidParameters(String),

    #[error("unknown source '{name}'{}", did_you_mean(.suggestion))]
    UnknownSource {
        name: String,
        suggestion: Option<String>,
    },

    #[error("source registry unavailable: {0}")]
    Registry(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{}'?)", s),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("client setup failed: {0}")]
    Client(String),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if e.is_builder() {
            TransportError::Client(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
