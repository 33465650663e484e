//! Adapts managed effect callbacks to the native processor contract.
//!
//! ```text
//! engine thread
//!     ↓ ProcessFn (C ABI)
//! process_trampoline::<C>      catch_unwind, never unwinds out
//!     ↓ Runtime::acquire        execution lock, released on every path
//! copy native → FloatList
//!     ↓ EffectCallback::process
//! copy FloatList → native       exactly k × channels samples
//! ```
//!
//! Samples always cross the boundary by copy. Managed code never sees a
//! native address, so a callback that stashes its lists cannot reach engine
//! memory after the call returns.

use std::any::Any;
use std::ffi::{c_uint, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fxbridge_script::{EffectCallback, FloatList, FrameCount, LockError, Runtime, ScriptError};

use crate::processor::EffectProcessor;

/// What the bridge writes when a callback fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Copy input straight to output for the frames both sides can hold.
    #[default]
    PassThrough,
    /// Zero the whole output buffer.
    Silence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BridgeConfig {
    pub on_error: ErrorPolicy,
}

/// Counters shared between a bridge and the processors it wraps.
#[derive(Debug, Default)]
pub struct BridgeStats {
    invocations: AtomicU64,
    callback_errors: AtomicU64,
    lock_failures: AtomicU64,
    clamped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub invocations: u64,
    pub callback_errors: u64,
    pub lock_failures: u64,
    pub clamped: u64,
}

impl BridgeStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            callback_errors: self.callback_errors.load(Ordering::Relaxed),
            lock_failures: self.lock_failures.load(Ordering::Relaxed),
            clamped: self.clamped.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    pub fn failures(&self) -> u64 {
        self.callback_errors + self.lock_failures
    }
}

/// Builds native processors around managed callbacks.
#[derive(Clone)]
pub struct Bridge {
    runtime: Arc<Runtime>,
    config: BridgeConfig,
    stats: Arc<BridgeStats>,
}

impl Bridge {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime, config: BridgeConfig::default(), stats: Arc::default() }
    }

    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> BridgeConfig {
        self.config
    }

    pub fn stats(&self) -> Arc<BridgeStats> {
        self.stats.clone()
    }

    /// Wrap `callback` in a processor the engine can call from its audio
    /// thread. The callback is released when the processor is dropped.
    pub fn wrap<C: EffectCallback>(&self, callback: C) -> EffectProcessor {
        let user_data = self.leak_state(callback);
        // SAFETY: `user_data` is a leaked `Trampoline<C>`, which is `Send`
        // because `C: Send`, and it is only freed by `release_trampoline::<C>`.
        unsafe {
            EffectProcessor::from_raw(
                process_trampoline::<C>,
                user_data,
                Some(release_trampoline::<C>),
            )
        }
    }

    fn leak_state<C: EffectCallback>(&self, callback: C) -> *mut c_void {
        let state = Box::new(Trampoline {
            runtime: self.runtime.clone(),
            config: self.config,
            stats: self.stats.clone(),
            callback,
            input: FloatList::new(),
            output: FloatList::new(),
        });
        Box::into_raw(state).cast::<c_void>()
    }
}

/// Wrap `callback` with the default configuration.
pub fn wrap<C: EffectCallback>(runtime: Arc<Runtime>, callback: C) -> EffectProcessor {
    Bridge::new(runtime).wrap(callback)
}

enum Failure {
    Lock(LockError),
    Script(ScriptError),
}

impl From<LockError> for Failure {
    fn from(err: LockError) -> Self {
        Self::Lock(err)
    }
}

impl From<ScriptError> for Failure {
    fn from(err: ScriptError) -> Self {
        Self::Script(err)
    }
}

struct Trampoline<C> {
    runtime: Arc<Runtime>,
    config: BridgeConfig,
    stats: Arc<BridgeStats>,
    callback: C,
    // Reused between calls so steady-state processing does not allocate.
    input: FloatList,
    output: FloatList,
}

impl<C: EffectCallback> Trampoline<C> {
    fn run(
        &mut self,
        input: &[f32],
        input_frames: &mut u32,
        output: &mut [f32],
        output_frames: &mut u32,
        channels: u32,
    ) {
        self.stats.invocations.fetch_add(1, Ordering::Relaxed);

        let result = catch_unwind(AssertUnwindSafe(|| {
            self.call(input, input_frames, output, output_frames, channels)
        }))
        .unwrap_or_else(|payload| Err(Failure::Script(ScriptError::Panicked(panic_message(payload)))));

        if let Err(failure) = result {
            self.report(&failure);
            self.fall_back(input, *input_frames, output, output_frames, channels);
        }
    }

    fn call(
        &mut self,
        input: &[f32],
        input_frames: &mut u32,
        output: &mut [f32],
        output_frames: &mut u32,
        channels: u32,
    ) -> Result<(), Failure> {
        let lock = self.runtime.acquire()?;

        self.input.refill_from(input);
        self.output.refill_from(output);
        let mut consumed = FrameCount::new(*input_frames);
        let mut produced = FrameCount::new(*output_frames);

        self.callback.process(
            &lock,
            &self.input,
            &mut consumed,
            &mut self.output,
            &mut produced,
            channels,
        )?;

        let ch = channels as usize;
        let available = u32::try_from(self.output.len() / ch).unwrap_or(u32::MAX);
        let frames = produced.get().min(*output_frames).min(available);
        if frames != produced.get() {
            let seen = self.stats.clamped.fetch_add(1, Ordering::Relaxed);
            if seen == 0 {
                tracing::warn!(
                    requested = produced.get(),
                    capacity = *output_frames,
                    returned = available,
                    "effect callback reported more output frames than it can deliver; clamping"
                );
            } else {
                tracing::debug!(requested = produced.get(), clamped = seen + 1, "clamping output frames");
            }
        }
        if consumed.get() > *input_frames {
            self.stats.clamped.fetch_add(1, Ordering::Relaxed);
            consumed.set(*input_frames);
        }

        let n = frames as usize * ch;
        output[..n].copy_from_slice(&self.output.as_slice()[..n]);
        *output_frames = frames;
        *input_frames = consumed.get();
        Ok(())
    }

    fn fall_back(
        &self,
        input: &[f32],
        input_frames: u32,
        output: &mut [f32],
        output_frames: &mut u32,
        channels: u32,
    ) {
        match self.config.on_error {
            ErrorPolicy::PassThrough => {
                let frames = input_frames.min(*output_frames);
                let n = frames as usize * channels as usize;
                output[..n].copy_from_slice(&input[..n]);
                *output_frames = frames;
            }
            ErrorPolicy::Silence => output.fill(0.0),
        }
    }

    fn report(&self, failure: &Failure) {
        match failure {
            Failure::Lock(err) => {
                let seen = self.stats.lock_failures.fetch_add(1, Ordering::Relaxed);
                if seen == 0 {
                    tracing::error!(%err, "could not enter the runtime from the audio thread");
                } else {
                    tracing::debug!(%err, failures = seen + 1, "could not enter the runtime");
                }
            }
            Failure::Script(err) => {
                let seen = self.stats.callback_errors.fetch_add(1, Ordering::Relaxed);
                // Only the first failure is loud; a broken callback fails every quantum.
                if seen == 0 {
                    tracing::warn!(%err, policy = ?self.config.on_error, "effect callback failed");
                } else {
                    tracing::debug!(%err, failures = seen + 1, "effect callback failed");
                }
            }
        }
    }
}

unsafe extern "C" fn process_trampoline<C: EffectCallback>(
    user_data: *mut c_void,
    input: *const f32,
    input_frame_count: *mut c_uint,
    output: *mut f32,
    output_frame_count: *mut c_uint,
    channel_count: c_uint,
) {
    if user_data.is_null() || input_frame_count.is_null() || output_frame_count.is_null() {
        return;
    }
    if channel_count == 0 {
        *output_frame_count = 0;
        return;
    }

    let ch = channel_count as usize;
    let input = if input.is_null() {
        *input_frame_count = 0;
        &[][..]
    } else {
        slice::from_raw_parts(input, *input_frame_count as usize * ch)
    };
    let output = if output.is_null() {
        *output_frame_count = 0;
        &mut [][..]
    } else {
        slice::from_raw_parts_mut(output, *output_frame_count as usize * ch)
    };

    let state = &mut *user_data.cast::<Trampoline<C>>();
    state.run(input, &mut *input_frame_count, output, &mut *output_frame_count, channel_count);
}

unsafe extern "C" fn release_trampoline<C: EffectCallback>(user_data: *mut c_void) {
    if user_data.is_null() {
        return;
    }
    let Trampoline { runtime, callback, .. } = *Box::from_raw(user_data.cast::<Trampoline<C>>());

    // Dropping the callback runs managed code, so it happens under the lock.
    let released = catch_unwind(AssertUnwindSafe(|| match runtime.acquire() {
        Ok(_lock) => drop(callback),
        Err(err) => {
            tracing::warn!(%err, "releasing effect callback without the execution lock");
            drop(callback);
        }
    }));
    if released.is_err() {
        tracing::error!("effect callback panicked while being released");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
