use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("channel count must be at least 1")]
    ZeroChannels,

    #[error("{frames} frames of {channels} channels exceed a buffer of {len} samples")]
    CountExceedsBuffer { frames: u32, channels: u32, len: usize },

    #[error("buffer of {len} samples is not a whole number of {channels}-channel frames")]
    ChannelMismatch { len: usize, channels: u32 },
}
