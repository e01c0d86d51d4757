use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Decode Error - {0}")]
    Decode(String),

    #[error("Expression Error - {0}")]
    Expression(String),

    /// Connection failures, timeouts and (when configured) non-2xx replies. Worth another attempt.
    #[error("Transport Error - {0}")]
    Transport(String),

    /// The downstream understood the request and refused it. Retrying will not help.
    #[error("Rejected Error - {0}")]
    Rejected(String),

    #[error("Config Error - {0}")]
    Config(String),

    #[error("Unsupported Type Error - {0}")]
    UnsupportedType(String),

    #[error("metrics Error - {0}")]
    Metrics(String),

    #[error("Server Error - {0}")]
    Server(String),
}

impl Error {
    /// Whether the dispatcher should try the same outbound unit again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Error::Config(err.to_string())
        } else {
            Error::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(Error::Transport("connection refused".into()).is_retryable());
        assert!(!Error::Rejected("400 Bad Request".into()).is_retryable());
        assert!(!Error::Decode("eof".into()).is_retryable());
        assert!(!Error::Config("missing".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::Config("Environment variable HTTP_URL is not set".into()).to_string(),
            "Config Error - Environment variable HTTP_URL is not set"
        );
    }
}
