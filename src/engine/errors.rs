#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Cookie engine command channel closed")]
    ChannelClosed,

    #[error("Cookie engine dropped the reply to {0}")]
    ReplyDropped(&'static str),

    #[error("Cookie engine is already running")]
    AlreadyRunning,
}
