use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::Stage;

#[derive(Debug, Error, Diagnostic)]
pub enum SpiceError {
    #[error("sequence provider unavailable: {0}")]
    #[diagnostic(help("the provider did not answer after retries; rerun once it is reachable"))]
    TransientProvider(String),

    #[error("sequence provider returned status {status}: {message}")]
    ProviderStatus { status: u16, message: String },

    #[error("identifier no longer recognized by the provider: {0}")]
    PermanentIdentifier(String),

    #[error("stage {stage} recorded as complete but live data disagrees: {detail}")]
    SchemaDrift { stage: Stage, detail: String },

    #[error("integrity check failed for stage {stage}: {detail}")]
    IntegrityViolation { stage: Stage, detail: String },

    #[error("write guard already held for {0}")]
    #[diagnostic(help("another build is running on this library; wait for it to finish"))]
    GuardConflict(String),

    #[error("malformed annotation record: {0}")]
    Format(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("no library found at {0}")]
    MissingLibrary(String),

    #[error("sample not found in results: {0}")]
    SampleNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(
        "stage {stage} aborted with {kind}; the next run resumes at {resume_from}",
        kind = .source.kind()
    )]
    StageAborted {
        stage: Stage,
        resume_from: Stage,
        #[source]
        source: Box<SpiceError>,
    },
}

impl SpiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            SpiceError::TransientProvider(_) | SpiceError::ProviderStatus { .. } => {
                "TransientProviderError"
            }
            SpiceError::PermanentIdentifier(_) => "PermanentIdentifierError",
            SpiceError::SchemaDrift { .. } => "SchemaDriftError",
            SpiceError::IntegrityViolation { .. } => "IntegrityViolation",
            SpiceError::GuardConflict(_) => "GuardConflict",
            SpiceError::Format(_) => "FormatError",
            SpiceError::StageAborted { source, .. } => source.kind(),
            _ => "Error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_stage_names_kind_and_resume_point() {
        let err = SpiceError::StageAborted {
            stage: Stage::SequenceCollection,
            resume_from: Stage::SequenceCollection,
            source: Box::new(SpiceError::TransientProvider("timeout".to_string())),
        };
        assert_eq!(err.kind(), "TransientProviderError");
        assert_eq!(
            err.to_string(),
            "stage #02 sequence_collection aborted with TransientProviderError; \
             the next run resumes at #02 sequence_collection"
        );
    }
}
