use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("invalid identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: &'static str },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid manifest {}: {reason}", path.display())]
    Manifest { path: PathBuf, reason: String },
}

impl SupervisorError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(value: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidIdentifier {
            value: value.into(),
            reason,
        }
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SupervisorError::invalid("a__b", "must not contain '__'");
        assert_eq!(
            err.to_string(),
            "invalid identifier 'a__b': must not contain '__'"
        );

        let err = SupervisorError::io(
            "/tmp/state.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "I/O error at /tmp/state.json: denied");
    }
}
