use thiserror::Error;

/// Errors surfaced across component boundaries. Constraint rejections
/// (risk, sizing, diversification) are deliberately not part of this
/// enum — they are structured values, not errors (see `RejectionReason`).
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("upstream I/O failure talking to {collaborator}: {source}")]
    UpstreamIo {
        collaborator: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to parse {what}: {reason}")]
    ParseFailure { what: &'static str, reason: String },

    #[error("fatal internal error: {0}")]
    Fatal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
