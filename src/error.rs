use std::io;

use thiserror::Error;

/// Errors surfaced by the engine, the harness and the transports.
///
/// Decode anomalies (failed decryption, malformed records, unparseable
/// messages) are not errors. They are recorded on the executed action.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Cannot connect: {0}")]
    Connect(String),

    #[error("No transport attached to connection context")]
    NotConnected,

    #[error("Timeout: {0}")]
    Timeout(&'static str),

    #[error("Epoch is not allowed to wrap")]
    WrappedEpoch,

    #[error("Sequence number overflow at {0}")]
    SequenceOverflow(u64),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Crypto error: {0}")]
    CryptoError(String),

    #[error("No connection context with alias: {0}")]
    UnknownAlias(String),

    #[error("Action already carries an execution result")]
    ActionAlreadyExecuted,

    #[error("Reset failed: {0}")]
    ResetFailed(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Whether another attempt could plausibly succeed.
    ///
    /// The retry harness only re-executes after transient failures. All other
    /// errors abort the call.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Connect(_) | Error::Timeout(_) | Error::NotConnected
        )
    }

    /// Whether this is the "peer not reachable yet" class of failure.
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Error::Connect(_))
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::Transport(value.to_string())
    }
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(value: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        match value {
            nom::Err::Incomplete(_) => Error::Parse("incomplete input".into()),
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                Error::Parse(format!("{:?} at {} remaining bytes", e.code, e.input.len()))
            }
        }
    }
}
