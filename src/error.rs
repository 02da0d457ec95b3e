//! Error handling for the scene inference core

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera access API missing or permission denied
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    /// Local inference server could not be reached
    #[error("Remote server unreachable: {0}")]
    RemoteServerUnreachable(String),

    /// Local inference server answered with a failure (HTTP status or transport)
    #[error("Remote request failed: {0}")]
    RemoteRequestFailed(String),

    /// Requested model is not installed on the inference server
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Local fallback engine used before initialize() completed
    #[error("Local engine not initialized")]
    LocalEngineNotInitialized,

    /// Inference manager used before initialize() completed
    #[error("Inference manager not ready")]
    ManagerNotReady,

    /// Host reported memory exhaustion (advisory)
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Mandatory host capabilities are missing
    #[error("Unsupported environment: {}", .0.join(", "))]
    UnsupportedEnvironment(Vec<String>),

    /// Frame payload could not be decoded
    #[error("Image decode error: {0}")]
    ImageDecode(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Failures of the remote pipeline that the inference manager absorbs by
    /// retrying on the local engine.
    pub fn is_remote_failure(&self) -> bool {
        matches!(
            self,
            Error::RemoteServerUnreachable(_)
                | Error::RemoteRequestFailed(_)
                | Error::ModelNotFound(_)
                | Error::Http(_)
                | Error::Serialization(_)
        )
    }

    /// Short machine-readable code for UI notices
    pub fn code(&self) -> &'static str {
        match self {
            Error::CameraUnavailable(_) => "CAMERA_UNAVAILABLE",
            Error::RemoteServerUnreachable(_) => "REMOTE_SERVER_UNREACHABLE",
            Error::RemoteRequestFailed(_) => "REMOTE_REQUEST_FAILED",
            Error::ModelNotFound(_) => "MODEL_NOT_FOUND",
            Error::LocalEngineNotInitialized => "LOCAL_ENGINE_NOT_INITIALIZED",
            Error::ManagerNotReady => "MANAGER_NOT_READY",
            Error::OutOfMemory(_) => "OUT_OF_MEMORY",
            Error::UnsupportedEnvironment(_) => "UNSUPPORTED_ENVIRONMENT",
            Error::ImageDecode(_) => "IMAGE_DECODE_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_failures_are_absorbable() {
        assert!(Error::RemoteRequestFailed("500".into()).is_remote_failure());
        assert!(Error::ModelNotFound("llava".into()).is_remote_failure());
        assert!(!Error::LocalEngineNotInitialized.is_remote_failure());
        assert!(!Error::ManagerNotReady.is_remote_failure());
    }

    #[test]
    fn test_unsupported_environment_message() {
        let err = Error::UnsupportedEnvironment(vec![
            "Camera access not supported".to_string(),
            "Network fetch not supported".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Unsupported environment: Camera access not supported, Network fetch not supported"
        );
        assert_eq!(err.code(), "UNSUPPORTED_ENVIRONMENT");
    }
}
