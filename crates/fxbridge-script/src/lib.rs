//! Managed-environment side of the effect bridge.
//!
//! Code that runs "inside" the scripting environment only ever sees the
//! types in this crate: a process-wide [`Runtime`] whose execution lock
//! serializes every entry into managed code, [`FloatList`] containers that
//! own copies of audio samples, and the [`EffectCallback`] trait that user
//! callbacks implement.

pub mod callback;
pub mod error;
pub mod lock;
pub mod value;

pub use callback::{EffectCallback, SharedCallback};
pub use error::{LockError, ScriptError};
pub use lock::{LockGuard, Runtime};
pub use value::{FloatList, FrameCount};
