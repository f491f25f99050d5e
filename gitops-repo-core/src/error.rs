//! Error types for the repository service

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for repository service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for repository service operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Uncategorised libgit2 error
    #[error("Git error: {0}")]
    Git(git2::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or malformed caller input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Repository descriptor is unusable (e.g. no remote URL)
    #[error("Invalid repository spec: {0}")]
    InvalidSpec(String),

    /// No descriptor for the requested repository
    #[error("Repository '{0}' not found")]
    RepositoryNotFound(String),

    /// Branch does not exist locally or on the remote
    #[error("Branch '{0}' not found")]
    BranchNotFound(String),

    /// Commit hash cannot be resolved
    #[error("Commit '{0}' not found")]
    CommitNotFound(String),

    /// Credential reference has no stored secret
    #[error("Secret '{0}' not found")]
    SecretNotFound(String),

    /// Path does not exist in the tree or working copy
    #[error("Path '{0}' not found")]
    PathNotFound(String),

    /// The remote rejected the supplied credentials
    #[error("Authentication rejected by remote: {0}")]
    TransportAuth(String),

    /// The remote could not be reached or its certificate failed verification
    #[error("Network error talking to remote: {0}")]
    TransportNetwork(String),

    /// The caller-supplied deadline passed during a transport operation
    #[error("Deadline exceeded during {0}")]
    DeadlineExceeded(String),

    /// The remote refused an update (e.g. non-fast-forward push)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Commit requested with nothing staged
    #[error("Working tree is clean, nothing to commit")]
    WorkTreeClean,

    /// Content larger than the configured limit
    #[error("File '{name}' is {size} bytes, limit is {limit} bytes")]
    ResourceExceeded { name: String, size: u64, limit: u64 },

    /// Directory at the clone path exists but is not a usable repository
    #[error("Failed to open clone at {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

/// Coarse error classification used by transport-facing layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    TransportAuth,
    TransportNetwork,
    Conflict,
    WorkTreeClean,
    ResourceExceeded,
    Internal,
}

impl ErrorKind {
    /// Whether the failure is attributable to the caller (4xx-style)
    pub fn is_client_error(self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidArgument
                | ErrorKind::NotFound
                | ErrorKind::Conflict
                | ErrorKind::WorkTreeClean
                | ErrorKind::ResourceExceeded
                | ErrorKind::TransportAuth
        )
    }
}

impl Error {
    /// Classify this error into the service taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) | Error::InvalidSpec(_) => ErrorKind::InvalidArgument,
            Error::RepositoryNotFound(_)
            | Error::BranchNotFound(_)
            | Error::CommitNotFound(_)
            | Error::SecretNotFound(_)
            | Error::PathNotFound(_) => ErrorKind::NotFound,
            Error::TransportAuth(_) => ErrorKind::TransportAuth,
            Error::TransportNetwork(_) | Error::DeadlineExceeded(_) => ErrorKind::TransportNetwork,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::WorkTreeClean => ErrorKind::WorkTreeClean,
            Error::ResourceExceeded { .. } => ErrorKind::ResourceExceeded,
            Error::Git(e) if e.code() == git2::ErrorCode::NotFound => ErrorKind::NotFound,
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            Error::Io(_) | Error::Git(_) | Error::Config(_) | Error::Open { .. } | Error::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Shorthand for [`Error::InvalidArgument`]
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

impl From<git2::Error> for Error {
    fn from(err: git2::Error) -> Self {
        use git2::{ErrorClass, ErrorCode};

        let message = err.message().to_string();
        match (err.code(), err.class()) {
            (ErrorCode::Auth, _) => Error::TransportAuth(message),
            (ErrorCode::Certificate, _) => Error::TransportNetwork(message),
            (ErrorCode::NotFastForward, _) => Error::Conflict(message),
            (_, ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssl | ErrorClass::Ssh) => {
                Error::TransportNetwork(message)
            }
            _ => Error::Git(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_kinds() {
        assert!(Error::WorkTreeClean.kind().is_client_error());
        assert!(Error::BranchNotFound("dev".into()).kind().is_client_error());
        assert!(Error::invalid("missing branch").kind().is_client_error());
        assert!(!Error::TransportNetwork("unreachable".into()).kind().is_client_error());
        assert!(!Error::Other("boom".into()).kind().is_client_error());
    }

    #[test]
    fn test_git_error_classification() {
        let err: Error = git2::Error::new(git2::ErrorCode::Auth, git2::ErrorClass::Http, "401").into();
        assert!(matches!(err, Error::TransportAuth(_)));

        let err: Error =
            git2::Error::new(git2::ErrorCode::NotFastForward, git2::ErrorClass::Reference, "nff").into();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err: Error = git2::Error::new(git2::ErrorCode::GenericError, git2::ErrorClass::Net, "dns").into();
        assert_eq!(err.kind(), ErrorKind::TransportNetwork);

        let err: Error = git2::Error::new(git2::ErrorCode::NotFound, git2::ErrorClass::Object, "gone").into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
