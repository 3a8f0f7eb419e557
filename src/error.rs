//! Custom error types for pricewatch

use thiserror::Error;

/// Main error type for pricewatch operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A submitted URL does not match the source's canonical link pattern
    #[error("Invalid link(s): {}", .0.join(", "))]
    InvalidLink(Vec<String>),

    /// The same URL would be active in two slots of one item
    #[error("Link {url} for slot {slot} is already active in slot {other_slot}")]
    SlotConflict {
        url: String,
        slot: u8,
        other_slot: u8,
    },

    #[error("Slot {0} is outside the valid range 0..=5")]
    InvalidSlot(i64),

    /// Fetch or parse could not produce both a title and a price
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// Persistent write contention after the retry budget was spent
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid time of day '{0}', expected HH:MM")]
    InvalidTime(String),

    #[error("Robots.txt disallowed: {0}")]
    RobotsDisallowed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Not initialized: run 'pricewatch init' first")]
    NotInitialized,

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

/// Result type alias for pricewatch
pub type Result<T> = std::result::Result<T, Error>;
