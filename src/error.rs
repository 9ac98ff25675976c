use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The password grant was refused (bad credentials or account locked).
    #[error("login failed: {status} {reason}")]
    Auth { status: u16, reason: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unknown room: {0}")]
    UnknownRoom(u64),

    #[error("temperature {value}\u{00b0}C outside {min}..={max}")]
    InvalidTemperature { value: f64, min: f64, max: f64 },

    /// The batch carrying this write was dropped without confirmation.
    #[error("write for room {room_id} was not applied: {reason}")]
    WriteFailed { room_id: u64, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transport-level failures that the request path retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::Timeout(Duration::from_secs(10)).is_transient());
        assert!(!Error::UnknownRoom(3).is_transient());
        assert!(
            !Error::Auth {
                status: 400,
                reason: "Bad Request".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn display_mentions_room() {
        let err = Error::WriteFailed {
            room_id: 7,
            reason: "server returned 500".into(),
        };
        assert_eq!(
            err.to_string(),
            "write for room 7 was not applied: server returned 500"
        );
    }
}
