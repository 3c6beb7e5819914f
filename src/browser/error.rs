use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rendering service error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("No page loaded; call goto first")]
    NoPage,

    #[error("Unexpected payload: {0}")]
    Payload(String),
}

impl From<reqwest::Error> for BrowserError {
    fn from(err: reqwest::Error) -> Self {
        BrowserError::Network(err.to_string())
    }
}
