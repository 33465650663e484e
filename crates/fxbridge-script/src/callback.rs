use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ScriptError;
use crate::lock::LockGuard;
use crate::value::{FloatList, FrameCount};

/// A managed effect callback.
///
/// Called with the execution lock held, once per processing quantum:
/// `input` holds `input_frames × channels` interleaved samples, `output`
/// holds `output_frames × channels` samples to be overwritten. Either count
/// may be lowered to report fewer frames consumed or produced.
pub trait EffectCallback: Send + 'static {
    fn process(
        &mut self,
        lock: &LockGuard<'_>,
        input: &FloatList,
        input_frames: &mut FrameCount,
        output: &mut FloatList,
        output_frames: &mut FrameCount,
        channels: u32,
    ) -> Result<(), ScriptError>;
}

impl<F> EffectCallback for F
where
    F: FnMut(&FloatList, &mut FrameCount, &mut FloatList, &mut FrameCount, u32) -> Result<(), ScriptError>
        + Send
        + 'static,
{
    fn process(
        &mut self,
        _lock: &LockGuard<'_>,
        input: &FloatList,
        input_frames: &mut FrameCount,
        output: &mut FloatList,
        output_frames: &mut FrameCount,
        channels: u32,
    ) -> Result<(), ScriptError> {
        self(input, input_frames, output, output_frames, channels)
    }
}

/// A callback the caller keeps a reference to after registering it.
///
/// Clones share one callback; the bridge holds one clone for as long as
/// its processor is attached.
pub struct SharedCallback<C>(Arc<Mutex<C>>);

impl<C> SharedCallback<C> {
    pub fn new(callback: C) -> Self {
        Self(Arc::new(Mutex::new(callback)))
    }

    pub fn lock(&self) -> parking_lot::MutexGuard<'_, C> {
        self.0.lock()
    }

    /// Number of live references, the caller's included.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl<C> Clone for SharedCallback<C> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<C: EffectCallback> EffectCallback for SharedCallback<C> {
    fn process(
        &mut self,
        lock: &LockGuard<'_>,
        input: &FloatList,
        input_frames: &mut FrameCount,
        output: &mut FloatList,
        output_frames: &mut FrameCount,
        channels: u32,
    ) -> Result<(), ScriptError> {
        self.0.lock().process(lock, input, input_frames, output, output_frames, channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::Runtime;

    struct Counter {
        calls: usize,
    }

    impl EffectCallback for Counter {
        fn process(
            &mut self,
            lock: &LockGuard<'_>,
            _input: &FloatList,
            _input_frames: &mut FrameCount,
            _output: &mut FloatList,
            _output_frames: &mut FrameCount,
            _channels: u32,
        ) -> Result<(), ScriptError> {
            assert!(lock.runtime().is_held_by_current_thread());
            self.calls += 1;
            Ok(())
        }
    }

    #[test]
    fn closures_are_callbacks() {
        let rt = Runtime::new();
        let guard = rt.acquire().unwrap();
        let mut cb = |input: &FloatList,
                      _: &mut FrameCount,
                      output: &mut FloatList,
                      out_frames: &mut FrameCount,
                      _: u32| {
            output.refill_from(input.as_slice());
            out_frames.set(1);
            Ok::<(), ScriptError>(())
        };

        let input = FloatList::from_slice(&[0.1, 0.2]);
        let mut output = FloatList::from_slice(&[0.0, 0.0]);
        let mut in_frames = FrameCount::new(1);
        let mut out_frames = FrameCount::new(1);
        EffectCallback::process(&mut cb, &guard, &input, &mut in_frames, &mut output, &mut out_frames, 2)
            .unwrap();
        assert_eq!(output.as_slice(), &[0.1, 0.2]);
    }

    #[test]
    fn shared_callback_state_is_visible_to_caller() {
        let rt = Runtime::new();
        let shared = SharedCallback::new(Counter { calls: 0 });
        let mut registered = shared.clone();

        let guard = rt.acquire().unwrap();
        let input = FloatList::new();
        let mut output = FloatList::new();
        for _ in 0..3 {
            registered
                .process(
                    &guard,
                    &input,
                    &mut FrameCount::new(0),
                    &mut output,
                    &mut FrameCount::new(0),
                    1,
                )
                .unwrap();
        }
        assert_eq!(shared.lock().calls, 3);
        assert_eq!(shared.ref_count(), 2);
        drop(registered);
        assert_eq!(shared.ref_count(), 1);
    }
}
