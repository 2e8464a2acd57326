use reqwest::StatusCode;
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FixError {
    #[error("invalid selection '{input}': expected a number between 0 and {}", .count.saturating_sub(1))]
    InvalidSelection { input: String, count: usize },

    #[error("no file path was entered")]
    EmptyInput,

    #[error("path '{0}' has no file name")]
    NoFileName(String),

    #[error("Could not obtain an access token. Error: {error}, {description}")]
    AuthFailed { error: String, description: String },

    #[error("authorization response state did not match the request")]
    StateMismatch,

    #[error("failed to bind redirect listener on {addr}: {source}")]
    CallbackBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("no authorization redirect received within {}s", .0.as_secs())]
    CallbackTimeout(Duration),

    #[error("redirect listener stopped before a request arrived")]
    CallbackClosed,

    #[error("No worksheets found.")]
    NoWorksheets { item_id: String, payload: Value },

    #[error("{operation} failed with HTTP {status}: {body}")]
    Api {
        operation: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("{operation} response is missing '{field}'")]
    MissingField {
        operation: &'static str,
        field: &'static str,
    },
}

impl FixError {
    pub fn auth_failed(error: Option<String>, description: Option<String>) -> Self {
        Self::AuthFailed {
            error: error.unwrap_or_else(|| "None".to_string()),
            description: description.unwrap_or_else(|| "None".to_string()),
        }
    }

    /// Failures the user gets a plain message for instead of an error chain.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::NoWorksheets { .. } | Self::AuthFailed { .. })
    }
}
