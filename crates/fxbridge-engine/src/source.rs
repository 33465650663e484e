use fxbridge_script::LockGuard;
use parking_lot::Mutex;

use crate::error::EngineError;
use crate::processor::EffectProcessor;

/// An interleaved stream with an optional effect processor in its path.
///
/// The engine thread calls [`SoundSource::process`] once per quantum; any
/// thread may attach or detach the effect meanwhile.
pub struct SoundSource {
    channels: u32,
    // Held by the engine thread for the whole of one invocation.
    effect: Mutex<Option<EffectProcessor>>,
}

impl SoundSource {
    pub fn new(channels: u16) -> Result<Self, EngineError> {
        if channels == 0 {
            return Err(EngineError::ZeroChannels);
        }
        Ok(Self { channels: u32::from(channels), effect: Mutex::new(None) })
    }

    pub fn channel_count(&self) -> u32 {
        self.channels
    }

    pub fn has_effect(&self) -> bool {
        // A busy slot means an invocation is running, so an effect is attached.
        self.effect.try_lock().map_or(true, |slot| slot.is_some())
    }

    /// Install `processor`, returning the one it replaces.
    ///
    /// The execution lock is released while waiting for an in-flight
    /// invocation, which may itself be waiting for the lock, so the returned
    /// processor is no longer in use.
    pub fn attach_effect(
        &self,
        lock: &mut LockGuard<'_>,
        processor: EffectProcessor,
    ) -> Option<EffectProcessor> {
        lock.unlocked(|| self.effect.lock().replace(processor))
    }

    /// Remove the effect. Once this returns the processor will not be
    /// invoked again; dropping it releases its callback.
    ///
    /// Must not be called from inside the effect itself.
    pub fn detach_effect(&self, lock: &mut LockGuard<'_>) -> Option<EffectProcessor> {
        lock.unlocked(|| self.effect.lock().take())
    }

    /// Process one interleaved block and return the number of frames
    /// written to the front of `output`. Without an effect, input is copied
    /// through.
    pub fn process(&self, input: &[f32], output: &mut [f32]) -> Result<usize, EngineError> {
        let ch = self.channels as usize;
        for len in [input.len(), output.len()] {
            if len % ch != 0 {
                return Err(EngineError::ChannelMismatch { len, channels: self.channels });
            }
        }
        let mut in_frames = frames_u32(input.len() / ch);
        let mut out_frames = frames_u32(output.len() / ch);

        let mut slot = self.effect.lock();
        if let Some(effect) = slot.as_mut() {
            effect.process(
                &input[..in_frames as usize * ch],
                &mut in_frames,
                &mut output[..out_frames as usize * ch],
                &mut out_frames,
                self.channels,
            )?;
            return Ok(out_frames as usize);
        }
        drop(slot);

        let frames = in_frames.min(out_frames) as usize;
        output[..frames * ch].copy_from_slice(&input[..frames * ch]);
        Ok(frames)
    }
}

fn frames_u32(frames: usize) -> u32 {
    u32::try_from(frames).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::wrap;
    use fxbridge_script::{FloatList, FrameCount, Runtime, ScriptError};

    fn invert(
        input: &FloatList,
        _: &mut FrameCount,
        output: &mut FloatList,
        _: &mut FrameCount,
        _: u32,
    ) -> Result<(), ScriptError> {
        for (o, i) in output.iter_mut().zip(input) {
            *o = -i;
        }
        Ok(())
    }

    #[test]
    fn zero_channels_rejected() {
        assert_eq!(SoundSource::new(0).err(), Some(EngineError::ZeroChannels));
    }

    #[test]
    fn passes_through_without_effect() {
        let src = SoundSource::new(2).unwrap();
        let mut out = [0.0; 4];
        assert_eq!(src.process(&[1.0, 2.0, 3.0, 4.0], &mut out).unwrap(), 2);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn ragged_block_rejected() {
        let src = SoundSource::new(2).unwrap();
        let mut out = [0.0; 4];
        assert_eq!(
            src.process(&[0.0; 3], &mut out),
            Err(EngineError::ChannelMismatch { len: 3, channels: 2 })
        );
    }

    #[test]
    fn attach_replace_detach() {
        let rt = Runtime::new();
        let src = SoundSource::new(1).unwrap();
        let mut lock = rt.acquire().unwrap();
        assert!(src.attach_effect(&mut lock, wrap(rt.clone(), invert)).is_none());
        assert!(src.has_effect());
        drop(lock);

        let mut out = [0.0; 2];
        src.process(&[0.5, 0.25], &mut out).unwrap();
        assert_eq!(out, [-0.5, -0.25]);

        let mut lock = rt.acquire().unwrap();
        assert!(src.attach_effect(&mut lock, wrap(rt.clone(), invert)).is_some());
        assert!(src.detach_effect(&mut lock).is_some());
        assert!(!src.has_effect());
        drop(lock);

        src.process(&[0.5, 0.25], &mut out).unwrap();
        assert_eq!(out, [0.5, 0.25]);
    }
}
