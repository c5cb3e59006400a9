//! Error types for the render service

use thiserror::Error;

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving a render request
#[derive(Error, Debug)]
pub enum Error {
    /// The inbound request carried no usable `url` parameter
    #[error("Missing target url")]
    MissingUrl,

    /// The target URL carried no decodable `options` parameter
    #[error("Missing or undecodable render options")]
    MissingOptions,

    /// Failed to launch a browser instance
    #[error("Browser launch failed: {0}")]
    BrowserLaunch(String),

    /// Cache missed and no browser could be launched to render the page
    #[error("No browser available to render the page")]
    BrowserUnavailable,

    /// Navigation or screenshot failed
    #[error("Rendering failed: {0}")]
    Render(String),

    /// Page work did not finish in time
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Cache backend failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The lifecycle actor has shut down
    #[error("Browser actor is no longer running")]
    ActorClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
