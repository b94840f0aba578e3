//! Pipeline error taxonomy

use thiserror::Error;

/// Errors a pipeline run can surface to its caller.
///
/// Transient tool failures never appear here: the evidence tools report
/// those as structured `error` fields in their return payloads and the
/// generating stage treats them as "information not available".
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Stage one produced no profile and no fallback key held one.
    /// Fatal: stage two is never invoked.
    #[error("No disease profile produced: {0}")]
    MissingProfile(String),

    /// The generative backend failed (HTTP, API, or response parsing).
    #[error("Model backend error: {0}")]
    Backend(String),

    /// The agentic tool loop ran past its iteration bound.
    #[error("Agent loop exceeded {0} iterations")]
    IterationsExceeded(u32),

    /// The validate-repair loop exhausted its attempt budget without a
    /// valid candidate.
    #[error("Module generation exhausted after {attempts} attempts; last defect: {last_defect}")]
    GenerationExhausted { attempts: u32, last_defect: String },

    /// A stage completed without emitting any final output.
    #[error("Stage \"{0}\" produced no final output")]
    NoFinalOutput(String),
}
