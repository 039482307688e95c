#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,
    #[error("frame of {len} bytes exceeds the configured maximum of {max} bytes")]
    OversizedFrame { len: usize, max: usize },
    #[error("codec error: {0}")]
    Codec(#[from] nakama_proto::CodecError),
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}
