//! The emulator-host bridge of the e9k debugger.
//!
//! The root type exposed by this crate is [`HostBridge`], which loads a
//! libretro-style core from a shared object, resolves its symbol set,
//! installs the callback thunks and presents everything the rest of the
//! debugger needs as a narrow, safe API: frame execution, the framebuffer,
//! audio queueing, input with deterministic record/replay, serialization
//! and the optional debug surface (breakpoints, watchpoints, protects,
//! memory access, disassembly, profiler checkpoints).
//!
//! # Capability model
//!
//! Only the handful of symbols every libretro core must export are
//! required at load time. Every debug symbol is optional: a core that does
//! not export `geo_debug_add_watchpoint` simply downgrades the watchpoint
//! API to [`HostErrorKind::Unsupported`] — a missing capability never
//! aborts startup and never disables the rest of the surface.
//!
//! # Callback state
//!
//! The core calls back into the host (video, audio, input, environment)
//! while `retro_run` executes. That callback-visible state lives in a
//! thread-local cell installed by [`HostBridge::start`] and torn down by
//! [`HostBridge::shutdown`]; the process hosts at most one core at a time.

use std::error::Error;
use std::fmt;
use std::io;

use thiserror::Error;

pub mod abi;
mod audio;
mod bridge;
mod input;
mod options;
mod record;
mod shared;
mod video;

pub use crate::abi::{watch_op, Checkpoint, ProtectEntry, Watchbreak, Watchpoint};
pub use crate::audio::AudioQueue;
pub use crate::bridge::{HostBridge, SaveStateInfo};
pub use crate::input::JOYPAD_START;
pub use crate::options::OptionStore;
pub use crate::record::{InputEvent, InputEventKind, InputRecorder};
pub use crate::video::{FrameRef, PixelFormat};

/// The error kind for [`HostError`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostErrorKind {
    /// The core library, a required symbol, the ROM or a directory could
    /// not be loaded at startup.
    Load,

    /// The core does not export the symbol backing this operation.
    Unsupported,

    /// A guest memory access was rejected or out of range.
    Memory,

    /// No core is loaded.
    NotRunning,

    /// A file operation failed.
    Io,
}

impl fmt::Display for HostErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => write!(f, "failed to load core"),
            Self::Unsupported => write!(f, "not supported by this core"),
            Self::Memory => write!(f, "guest memory access failed"),
            Self::NotRunning => write!(f, "no core loaded"),
            Self::Io => write!(f, "i/o error"),
        }
    }
}

/// An error returned by the host bridge.
#[derive(Debug, Error)]
#[error("{kind}{}", .context.as_deref().map(|c| format!(": {c}")).unwrap_or_default())]
pub struct HostError {
    kind: HostErrorKind,
    context: Option<String>,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl HostError {
    pub(crate) fn new<E>(kind: HostErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Self {
            kind,
            context: None,
            source: Some(source.into()),
        }
    }

    pub(crate) fn with_context(kind: HostErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: Some(context.into()),
            source: None,
        }
    }

    /// An [`Unsupported`](HostErrorKind::Unsupported) error naming the
    /// missing core symbol.
    pub(crate) fn unsupported(symbol: &str) -> Self {
        Self::with_context(HostErrorKind::Unsupported, symbol)
    }

    /// Returns the corresponding [`HostErrorKind`] for this error.
    pub fn kind(&self) -> HostErrorKind {
        self.kind
    }
}

impl From<HostErrorKind> for HostError {
    fn from(kind: HostErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }
}

impl From<io::Error> for HostError {
    fn from(e: io::Error) -> Self {
        Self::new(HostErrorKind::Io, e)
    }
}

impl From<libloading::Error> for HostError {
    fn from(e: libloading::Error) -> Self {
        Self::new(HostErrorKind::Load, e)
    }
}
