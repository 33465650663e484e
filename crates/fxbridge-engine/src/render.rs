use crate::error::EngineError;
use crate::source::SoundSource;

/// Drive `source` over `input` in blocks of `block_frames`, the way the
/// live engine would, and collect what it produces.
pub fn render_offline(
    source: &SoundSource,
    input: &[f32],
    block_frames: usize,
) -> Result<Vec<f32>, EngineError> {
    let ch = source.channel_count() as usize;
    if input.len() % ch != 0 {
        return Err(EngineError::ChannelMismatch { len: input.len(), channels: source.channel_count() });
    }

    let block_len = block_frames.max(1) * ch;
    let mut rendered = Vec::with_capacity(input.len());
    let mut block = vec![0.0f32; block_len];
    for chunk in input.chunks(block_len) {
        let out = &mut block[..chunk.len()];
        out.fill(0.0);
        let frames = source.process(chunk, out)?;
        rendered.extend_from_slice(&out[..frames * ch]);
    }
    Ok(rendered)
}
