use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The tracker answered with a non-2xx status.
    #[error("tracker http status {0}")]
    Http(u16),

    /// The tracker answered with a `failure reason`.
    #[error("tracker failure: {0}")]
    Failure(String),

    /// The body parsed as neither the standard nor the compact shape.
    #[error("unparsable announce response")]
    UnparsableResponse,

    /// The announce was aborted by closing the client.
    #[error("announce cancelled")]
    Cancelled,

    #[error("invalid announce url: {0}")]
    InvalidUrl(String),
}
