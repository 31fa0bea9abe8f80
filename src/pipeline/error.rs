//! Pipeline-level errors

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage could not be set up; the player never starts
    #[error("{stage} initialization failed: {source}")]
    Init {
        stage: &'static str,
        #[source]
        source: BoxError,
    },

    /// Allocation or another resource ran out while running
    #[error("resource exhausted: {0}")]
    Resource(String),

    #[error("invalid pipeline state: cannot go from {from} to {to}")]
    InvalidState {
        from: &'static str,
        to: &'static str,
    },
}

impl PipelineError {
    pub fn init(stage: &'static str, source: impl Into<BoxError>) -> Self {
        PipelineError::Init {
            stage,
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_init_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = PipelineError::init("source", io);
        assert_eq!(
            err.to_string(),
            "source initialization failed: no such file"
        );
        assert!(err.source().is_some());
    }
}
