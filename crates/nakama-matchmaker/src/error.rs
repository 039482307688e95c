#[derive(Debug, thiserror::Error)]
pub enum MatchmakerError {
    #[error(transparent)]
    Query(#[from] crate::query::QueryParseError),
    #[error("ticket {0} not found")]
    TicketNotFound(crate::ticket::TicketId),
    #[error("min_count {min} exceeds max_count {max}")]
    InvalidRange { min: u32, max: u32 },
    #[error("count_multiple must be at least 1")]
    InvalidCountMultiple,
}
