//! The native effect-processor contract.
//!
//! The engine knows processors only through this C-ABI shape: a function
//! pointer, an opaque `user_data` word handed back on every call, and an
//! optional release function run exactly once when the processor is dropped.

use std::ffi::{c_uint, c_void};

use crate::error::EngineError;

/// `(user_data, input, input_frame_count, output, output_frame_count, channel_count)`
///
/// `input` holds `*input_frame_count × channel_count` samples and `output`
/// has room for `*output_frame_count × channel_count`. The processor may
/// lower either count; it must not raise them and must not unwind.
pub type ProcessFn = unsafe extern "C" fn(
    user_data: *mut c_void,
    input: *const f32,
    input_frame_count: *mut c_uint,
    output: *mut f32,
    output_frame_count: *mut c_uint,
    channel_count: c_uint,
);

pub type ReleaseFn = unsafe extern "C" fn(user_data: *mut c_void);

pub struct EffectProcessor {
    process: ProcessFn,
    release: Option<ReleaseFn>,
    user_data: *mut c_void,
}

// SAFETY: `from_raw` requires `user_data` to be usable from whichever thread
// the engine processes on, and the engine never calls one processor from
// two threads at once.
unsafe impl Send for EffectProcessor {}

impl EffectProcessor {
    /// # Safety
    ///
    /// `process` must honour the contract on [`ProcessFn`] for `user_data`
    /// until `release` has run, and `user_data` must be safe to move to
    /// another thread.
    pub unsafe fn from_raw(process: ProcessFn, user_data: *mut c_void, release: Option<ReleaseFn>) -> Self {
        Self { process, release, user_data }
    }

    /// Run the processor over one quantum.
    ///
    /// `input_frames` and `output_frames` are in-out: on return they hold the
    /// frames consumed and produced.
    pub fn process(
        &mut self,
        input: &[f32],
        input_frames: &mut u32,
        output: &mut [f32],
        output_frames: &mut u32,
        channels: u32,
    ) -> Result<(), EngineError> {
        if channels == 0 {
            return Err(EngineError::ZeroChannels);
        }
        check_fits(*input_frames, channels, input.len())?;
        check_fits(*output_frames, channels, output.len())?;

        let in_capacity = *input_frames;
        let out_capacity = *output_frames;
        // SAFETY: both counts were checked against the slice lengths above.
        unsafe {
            (self.process)(
                self.user_data,
                input.as_ptr(),
                input_frames,
                output.as_mut_ptr(),
                output_frames,
                channels,
            );
        }

        *input_frames = (*input_frames).min(in_capacity);
        *output_frames = (*output_frames).min(out_capacity);
        Ok(())
    }
}

impl Drop for EffectProcessor {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            // SAFETY: runs once, after the last call to `process`.
            unsafe { release(self.user_data) }
        }
    }
}

fn check_fits(frames: u32, channels: u32, len: usize) -> Result<(), EngineError> {
    let needed = frames as usize * channels as usize;
    if needed > len {
        return Err(EngineError::CountExceedsBuffer { frames, channels, len });
    }
    Ok(())
}
