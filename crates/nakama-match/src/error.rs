#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("match module {0:?} is not registered")]
    ModuleNotFound(String),
    #[error("match-handler's init returned tick_rate_hz {0}, outside the required [1, 60] range")]
    InvalidTickRate(u32),
    #[error("match {0} not found")]
    NotFound(String),
    #[error("match {0} has already begun terminating")]
    Terminating(String),
    #[error("join rejected: {0}")]
    JoinRejected(String),
    #[error("match handler init failed: {0}")]
    InitFailed(String),
}
