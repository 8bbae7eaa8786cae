use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("venue error: {0}")]
    Venue(String),

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
}
