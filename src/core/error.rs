use thiserror::Error;

/// Classified failures surfaced by the production pipeline.
///
/// Every variant renders as a plain user-facing string; nothing here carries
/// a payload a UI would need to unpack before display.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("Network request failed: {0}")]
    NetworkFailure(String),

    /// Some but not all items of a batch failed. Swallowed at the section
    /// level by policy; kept in the taxonomy for logging and tests.
    #[error("{failed} of {requested} lines failed to synthesize")]
    PartialBatchFailure { requested: usize, failed: usize },

    /// Zero items of a batch succeeded. The first remote error message is
    /// what the user sees.
    #[error("Speech synthesis failed: {0}")]
    TotalBatchFailure(String),

    #[error("No voice audio available to mix")]
    NoInputData,

    #[error("Draft snapshot exceeds the storage budget ({size} bytes)")]
    SerializationOverflow { size: usize },

    #[error("Media task failed: {0}")]
    TaskFailure(String),

    /// A generation call targeted a section that already has one in flight.
    #[error("Section \"{0}\" is already being generated")]
    SectionBusy(String),
}
