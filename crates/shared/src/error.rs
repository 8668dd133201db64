use thiserror::Error;

/// Failure of a confirmed mutating command. Both variants are fail-closed:
/// the engine applies no local mutation and the caller may retry by
/// reissuing the identical command.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    #[error("command rejected by server (status {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("command transport failed: {0}")]
    Transport(String),
}
