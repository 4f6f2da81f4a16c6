use thiserror::Error;

/// stagekey error types
#[derive(Error, Debug)]
pub enum DigestError {
    /// Dockerfile could not be parsed
    #[error("Dockerfile line {line}: {message}")]
    ParseError { line: usize, message: String },

    /// Malformed shell-word syntax during variable resolution
    #[error("Failed to process {input:?}: {message}")]
    ExpansionError { input: String, message: String },

    /// A runtime, registry or checksum collaborator call failed
    #[error("{call} failed for {target}: {message}")]
    ResolutionError {
        call: String,
        target: String,
        message: String,
    },

    /// The registry returned a manifest format that cannot be parsed
    #[error("Unsupported manifest format for {reference}: {message}")]
    UnsupportedManifest { reference: String, message: String },

    /// A file that would contribute to a checksum was rejected by policy
    #[error("Policy violation for {path}: {message}")]
    PolicyViolation { path: String, message: String },

    /// Failure attributed to one stage and instruction
    #[error("Stage {stage} `{instruction}`: {source}")]
    StageError {
        stage: usize,
        instruction: String,
        #[source]
        source: Box<DigestError>,
    },

    /// Requested target stage does not exist
    #[error("Target stage not found: {0}")]
    StageNotFound(String),

    /// Engine operation called out of order
    #[error("Invalid engine state: {0}")]
    StateError(String),

    /// Caller cancelled the computation
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// OCI image error
    #[error("OCI image error: {0}")]
    OciImageError(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },
}

impl DigestError {
    /// Attribute this error to a stage and the instruction being processed.
    ///
    /// Errors already attributed to a stage are returned unchanged so the
    /// innermost location wins.
    pub fn in_stage(self, stage: usize, instruction: impl Into<String>) -> Self {
        match self {
            DigestError::StageError { .. } => self,
            other => DigestError::StageError {
                stage,
                instruction: instruction.into(),
                source: Box::new(other),
            },
        }
    }

    /// Record which collaborator call failed.
    ///
    /// Kinds the engine reacts to (cancellation, policy, unsupported
    /// manifest) and errors that already name a call pass through.
    pub fn during(self, call: &str, target: &str) -> Self {
        match self {
            DigestError::Cancelled
            | DigestError::PolicyViolation { .. }
            | DigestError::UnsupportedManifest { .. }
            | DigestError::ResolutionError { .. }
            | DigestError::StageError { .. } => self,
            other => DigestError::ResolutionError {
                call: call.to_string(),
                target: target.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// The innermost error, skipping stage attribution.
    pub fn root(&self) -> &DigestError {
        match self {
            DigestError::StageError { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for DigestError {
    fn from(err: serde_json::Error) -> Self {
        DigestError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for DigestError {
    fn from(err: serde_yaml::Error) -> Self {
        DigestError::SerializationError(err.to_string())
    }
}

/// Result type alias for stagekey operations
pub type Result<T> = std::result::Result<T, DigestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let error = DigestError::ParseError {
            line: 3,
            message: "Unknown instruction 'FORM'".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Dockerfile line 3: Unknown instruction 'FORM'"
        );
    }

    #[test]
    fn test_expansion_error_display() {
        let error = DigestError::ExpansionError {
            input: "'abc".to_string(),
            message: "unexpected end of statement".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to process \"'abc\": unexpected end of statement"
        );
    }

    #[test]
    fn test_resolution_error_display() {
        let error = DigestError::ResolutionError {
            call: "registry config lookup".to_string(),
            target: "alpine:3.19".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "registry config lookup failed for alpine:3.19: connection refused"
        );
    }

    #[test]
    fn test_policy_violation_display() {
        let error = DigestError::PolicyViolation {
            path: "secrets/key.pem".to_string(),
            message: "matches forbidden pattern 'secrets/**'".to_string(),
        };
        assert!(error.to_string().contains("secrets/key.pem"));
    }

    #[test]
    fn test_in_stage_wraps_once() {
        let error = DigestError::Cancelled
            .in_stage(1, "COPY app.go .")
            .in_stage(2, "FROM builder");
        match &error {
            DigestError::StageError {
                stage, instruction, ..
            } => {
                assert_eq!(*stage, 1);
                assert_eq!(instruction, "COPY app.go .");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(error.root(), DigestError::Cancelled));
        assert_eq!(
            error.to_string(),
            "Stage 1 `COPY app.go .`: Operation cancelled"
        );
    }

    #[test]
    fn test_during_wraps_plain_errors() {
        let error = DigestError::OciImageError("bad config".to_string())
            .during("local image inspection", "alpine");
        match error {
            DigestError::ResolutionError {
                call,
                target,
                message,
            } => {
                assert_eq!(call, "local image inspection");
                assert_eq!(target, "alpine");
                assert_eq!(message, "OCI image error: bad config");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_during_keeps_distinguished_kinds() {
        let error = DigestError::UnsupportedManifest {
            reference: "old:1".to_string(),
            message: "schema 1".to_string(),
        }
        .during("registry config lookup", "old:1");
        assert!(matches!(error, DigestError::UnsupportedManifest { .. }));

        let error = DigestError::Cancelled.during("image pull", "alpine");
        assert!(matches!(error, DigestError::Cancelled));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: DigestError = io_error.into();
        assert!(matches!(error, DigestError::IoError(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ invalid");
        let error: DigestError = result.unwrap_err().into();
        assert!(matches!(error, DigestError::SerializationError(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let error: DigestError = result.unwrap_err().into();
        assert!(matches!(error, DigestError::SerializationError(_)));
    }
}
