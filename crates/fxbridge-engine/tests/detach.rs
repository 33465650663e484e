use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

use fxbridge_engine::{wrap, SoundSource};
use fxbridge_script::{EffectCallback, FloatList, FrameCount, LockGuard, Runtime, ScriptError, SharedCallback};

/// Signals when a quantum starts, then stalls so the test can race a detach
/// against it. Flags `released` when dropped.
struct Slow {
    started: mpsc::Sender<()>,
    in_flight: Arc<AtomicBool>,
    released: Arc<AtomicBool>,
}

impl EffectCallback for Slow {
    fn process(
        &mut self,
        _lock: &LockGuard<'_>,
        input: &FloatList,
        _input_frames: &mut FrameCount,
        output: &mut FloatList,
        _output_frames: &mut FrameCount,
        _channels: u32,
    ) -> Result<(), ScriptError> {
        assert!(!self.released.load(Ordering::SeqCst), "callback used after release");
        self.in_flight.store(true, Ordering::SeqCst);
        let _ = self.started.send(());
        thread::sleep(Duration::from_millis(50));
        output.as_mut_slice().copy_from_slice(input.as_slice());
        self.in_flight.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for Slow {
    fn drop(&mut self) {
        assert!(!self.in_flight.load(Ordering::SeqCst), "released mid-invocation");
        self.released.store(true, Ordering::SeqCst);
    }
}

#[test]
fn detach_waits_for_in_flight_invocation() {
    let rt = Runtime::new();
    let source = Arc::new(SoundSource::new(2).unwrap());
    let (started_tx, started_rx) = mpsc::channel();
    let in_flight = Arc::new(AtomicBool::new(false));
    let released = Arc::new(AtomicBool::new(false));

    let mut lock = rt.acquire().unwrap();
    source.attach_effect(
        &mut lock,
        wrap(
            rt.clone(),
            Slow { started: started_tx, in_flight: in_flight.clone(), released: released.clone() },
        ),
    );
    drop(lock);

    let audio = {
        let source = source.clone();
        thread::spawn(move || {
            let mut out = [0.0; 8];
            source.process(&[0.5; 8], &mut out).unwrap();
            out
        })
    };

    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let mut lock = rt.acquire().unwrap();
    let detached = source.detach_effect(&mut lock).expect("effect was attached");
    assert!(!in_flight.load(Ordering::SeqCst));
    drop(detached);
    assert!(released.load(Ordering::SeqCst));
    drop(lock);

    assert_eq!(audio.join().unwrap(), [0.5; 8]);
}

#[test]
fn no_invocations_after_detach() {
    let rt = Runtime::new();
    let source = Arc::new(SoundSource::new(1).unwrap());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut lock = rt.acquire().unwrap();
    source.attach_effect(&mut lock, wrap(rt.clone(), move |_: &FloatList, _: &mut FrameCount, _: &mut FloatList, _: &mut FrameCount, _: u32| -> Result<(), ScriptError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));
    drop(lock);

    let stop = Arc::new(AtomicBool::new(false));
    let audio = {
        let (source, stop) = (source.clone(), stop.clone());
        thread::spawn(move || {
            let mut out = [0.0; 64];
            while !stop.load(Ordering::SeqCst) {
                source.process(&[0.0; 64], &mut out).unwrap();
            }
        })
    };

    while calls.load(Ordering::SeqCst) < 10 {
        thread::yield_now();
    }
    let mut lock = rt.acquire().unwrap();
    drop(source.detach_effect(&mut lock));
    drop(lock);
    let after_detach = calls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(calls.load(Ordering::SeqCst), after_detach);

    stop.store(true, Ordering::SeqCst);
    audio.join().unwrap();
}

#[test]
fn attach_and_detach_race_with_processing() {
    let rt = Runtime::new();
    let source = Arc::new(SoundSource::new(2).unwrap());
    let shared = SharedCallback::new(
        |i: &FloatList, _: &mut FrameCount, o: &mut FloatList, _: &mut FrameCount, _: u32| -> Result<(), ScriptError> {
            o.as_mut_slice().copy_from_slice(i.as_slice());
            Ok(())
        },
    );
    let barrier = Arc::new(Barrier::new(2));

    let audio = {
        let (source, barrier) = (source.clone(), barrier.clone());
        thread::spawn(move || {
            barrier.wait();
            let input: Vec<f32> = (0..32).map(|i| i as f32).collect();
            let mut out = [0.0; 32];
            for _ in 0..2_000 {
                let frames = source.process(&input, &mut out).unwrap();
                assert_eq!(&out[..frames * 2], &input[..frames * 2]);
            }
        })
    };

    barrier.wait();
    for _ in 0..200 {
        let mut lock = rt.acquire().unwrap();
        drop(source.attach_effect(&mut lock, wrap(rt.clone(), shared.clone())));
        drop(source.detach_effect(&mut lock));
    }
    audio.join().unwrap();
    assert_eq!(shared.ref_count(), 1);
}

#[test]
fn detach_while_holding_the_lock_does_not_deadlock() {
    let rt = Runtime::new();
    let source = Arc::new(SoundSource::new(1).unwrap());
    {
        let mut lock = rt.acquire().unwrap();
        source.attach_effect(&mut lock, wrap(rt.clone(), |_: &FloatList, _: &mut FrameCount, _: &mut FloatList, _: &mut FrameCount, _: u32| -> Result<(), ScriptError> {
            Ok(())
        }));
    }

    let (held_tx, held_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let (done_tx, done_rx) = mpsc::channel();

    // A script-side thread: holds the execution lock the whole time.
    let control = {
        let (rt, source) = (rt.clone(), source.clone());
        thread::spawn(move || {
            let mut lock = rt.acquire().unwrap();
            held_tx.send(()).unwrap();
            go_rx.recv().unwrap();
            let detached = source.detach_effect(&mut lock);
            assert!(rt.is_held_by_current_thread());
            done_tx.send(detached.is_some()).unwrap();
        })
    };
    held_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // The audio thread takes the effect slot, then parks on the execution lock.
    let audio = {
        let source = source.clone();
        thread::spawn(move || {
            let mut out = [0.0; 4];
            source.process(&[0.25; 4], &mut out).unwrap();
        })
    };
    thread::sleep(Duration::from_millis(20));
    go_tx.send(()).unwrap();

    let detached = done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("detach did not return while the caller held the lock");
    assert!(detached);
    control.join().unwrap();
    audio.join().unwrap();
    assert!(!source.has_effect());
}
