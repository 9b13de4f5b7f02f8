/// Failure classes of the solving pipeline.
///
/// Transient and malformed-output errors are absorbed by the stage that sees
/// them; fatal-init errors abort the whole run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("transient failure from {source_name}: {reason}")]
    TransientSource { source_name: String, reason: String },

    #[error("malformed model output: {reason}")]
    MalformedOutput { reason: String },

    #[error("initialization failed: {reason}")]
    FatalInit { reason: String },
}

impl PipelineError {
    pub fn transient(source_name: &str, reason: impl Into<String>) -> Self {
        Self::TransientSource {
            source_name: source_name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedOutput {
            reason: reason.into(),
        }
    }

    pub fn fatal_init(reason: impl Into<String>) -> Self {
        Self::FatalInit {
            reason: reason.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalInit { .. })
    }
}
