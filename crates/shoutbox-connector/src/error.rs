//! Error types for the chatbox connector.

use thiserror::Error;

/// Errors that can occur while talking to the forum.
#[derive(Debug, Error)]
pub enum Error {
    /// The recovery ladder was exhausted; the operation will not be
    /// retried automatically.
    #[error("transfer failed after token refresh and re-login")]
    Transfer,

    /// HTTP-level failure from the underlying client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Login form submission did not produce an authenticated session.
    #[error("login failed: {0}")]
    Login(String),

    /// A fetched page did not have the structure we scrape for.
    #[error("page scrape failed: {0}")]
    PageScrape(String),

    /// The server answered but refused or mangled the request.
    #[error("server rejected the request: {0}")]
    Rejected(String),

    /// The configured base URL cannot be combined into endpoint URLs.
    #[error("invalid base URL: {0}")]
    BaseUrl(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the recovery ladder (token refresh, then re-login) may
    /// fix this failure.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Login(_) | Self::PageScrape(_) | Self::Rejected(_) => true,
            Self::Transfer | Self::BaseUrl(_) => false,
        }
    }
}
