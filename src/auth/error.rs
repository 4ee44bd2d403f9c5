use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the credential store and token service.
///
/// `InvalidCredentials`, `InvalidToken` and `ExpiredToken` are deliberately
/// coarse: callers map all three to the same unauthorized response.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("tenant is already registered")]
    DuplicateCredential,

    #[error("invalid tenant id or password")]
    InvalidCredentials,

    #[error("invalid token")]
    InvalidToken,

    #[error("token has expired")]
    ExpiredToken,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("credential store at {path} is corrupt: {reason}")]
    CorruptStore { path: PathBuf, reason: String },

    #[error("credential store I/O failed: {0}")]
    Storage(#[from] std::io::Error),

    #[error("credential store encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuthError {
    /// True for every outcome a client should see as plain "unauthorized".
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials | Self::InvalidToken | Self::ExpiredToken
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_groups_credential_and_token_failures() {
        assert!(AuthError::InvalidCredentials.is_unauthorized());
        assert!(AuthError::InvalidToken.is_unauthorized());
        assert!(AuthError::ExpiredToken.is_unauthorized());
        assert!(!AuthError::DuplicateCredential.is_unauthorized());
        assert!(!AuthError::InvalidInput("x".into()).is_unauthorized());
    }

    #[test]
    fn corrupt_store_message_names_path() {
        let err = AuthError::CorruptStore {
            path: PathBuf::from("/tmp/users.json"),
            reason: "expected value".into(),
        };
        assert!(err.to_string().contains("/tmp/users.json"));
    }
}
