//! Error types for the EasyNode runtime

use std::process::ExitCode;
use thiserror::Error;

/// Main error type for EasyNode operations
#[derive(Debug, Error)]
pub enum EasyNodeError {
    /// Invalid or incomplete node configuration (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The external parameter store holds no value for this name
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    /// Parameter was never declared on this node
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Unknown subscription: {0}")]
    UnknownSubscription(String),

    #[error("Unknown publisher: {0}")]
    UnknownPublisher(String),

    /// A phase with this name is already open in the current invocation
    #[error("Phase '{0}' is already active in this invocation")]
    PhaseReentered(String),

    /// Operation not allowed in the node's current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Failure raised inside a message handler
    #[error("Handler failure: {0}")]
    Handler(String),

    /// Bus registration or delivery failure
    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// Any other error raised by user code
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for EasyNode operations
pub type EasyNodeResult<T> = Result<T, EasyNodeError>;

impl EasyNodeError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    pub fn communication(msg: impl Into<String>) -> Self {
        Self::Communication(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Errors carrying a message meant for the operator, printed without a backtrace
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::MissingParameter(_) | Self::UnknownParameter(_)
        )
    }
}

/// Exit status for a finished entry point.
///
/// `0` on success, `1` for user errors (message only), `2` for everything else.
pub fn exit_status(result: &EasyNodeResult<()>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(e) if e.is_user_error() => 1,
        Err(_) => 2,
    }
}

/// Run a node entry point, log its failure and map the outcome to a process exit code.
pub fn run_main<F>(entry: F) -> ExitCode
where
    F: FnOnce() -> EasyNodeResult<()>,
{
    let result = entry();
    match &result {
        Ok(()) => {}
        Err(e) if e.is_user_error() => log::error!("{}", e),
        Err(e) => log::error!("{:?}", e),
    }
    ExitCode::from(exit_status(&result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors() {
        assert!(EasyNodeError::config("Could not load required parameter 'x'").is_user_error());
        assert!(EasyNodeError::MissingParameter("/n/x".into()).is_user_error());
        assert!(!EasyNodeError::handler("boom").is_user_error());
        assert!(!EasyNodeError::Internal("spawn".into()).is_user_error());
    }

    #[test]
    fn test_exit_status() {
        assert_eq!(exit_status(&Ok(())), 0);
        assert_eq!(exit_status(&Err(EasyNodeError::config("bad"))), 1);
        assert_eq!(exit_status(&Err(EasyNodeError::handler("bad"))), 2);
    }

    #[test]
    fn test_anyhow_conversion() {
        fn fails() -> EasyNodeResult<()> {
            Err::<(), _>(anyhow::anyhow!("decode failed"))?;
            Ok(())
        }
        let err = fails().unwrap_err();
        assert!(matches!(err, EasyNodeError::Other(_)));
        assert_eq!(err.to_string(), "decode failed");
    }
}
