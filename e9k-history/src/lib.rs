//! Rolling state history for the e9k debugger.
//!
//! The root type exposed by this crate is [`StateRing`], which keeps the
//! last N frames of fully restorable emulator state within a byte budget
//! and supports seeking by frame number in either direction.
//!
//! # Background
//!
//! Reverse stepping in a debugger that hosts an opaque emulator core cannot
//! un-execute instructions; instead the host serializes the entire emulator
//! state once per video frame and keeps a bounded history. Storing every
//! frame verbatim would blow the budget within seconds, so consecutive
//! frames are stored as deltas over a fixed 64-byte block grid (see
//! [`delta`]): only blocks that changed since the previous frame are kept.
//! The first retained frame is always a keyframe (a full serialized state),
//! and any frame can be reconstructed by applying the deltas that follow
//! its nearest preceding keyframe.
//!
//! The ring can be persisted to disk (see [`snapshot`]) and restored in a
//! later session, gated on the FNV-1a checksum of the ROM it was recorded
//! against.

use std::error::Error;
use std::fmt;
use std::io;

use thiserror::Error;

pub mod delta;
mod ring;
pub mod snapshot;
mod source;

pub use crate::ring::{FrameRecord, StateRing};
pub use crate::source::StateSource;

/// The error kind for [`HistoryError`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryErrorKind {
    /// The emulator reported no serializable state.
    EmptyState,

    /// The emulator failed to serialize its state.
    SerializeFailed,

    /// The emulator rejected a reconstructed state.
    UnserializeFailed,

    /// The requested frame number is not in the retained window.
    UnknownFrame,

    /// A delta payload is malformed or does not match the state size.
    BadDelta,

    /// A snapshot file does not start with the `E9KSNAP` magic.
    BadFileMagic,

    /// A snapshot file has an unsupported format version.
    UnsupportedVersion,

    /// A snapshot file is truncated or otherwise unreadable.
    Io,
}

impl fmt::Display for HistoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyState => write!(f, "emulator state is empty"),
            Self::SerializeFailed => write!(f, "emulator state serialization failed"),
            Self::UnserializeFailed => write!(f, "emulator rejected restored state"),
            Self::UnknownFrame => write!(f, "frame not in state history"),
            Self::BadDelta => write!(f, "malformed state delta"),
            Self::BadFileMagic => write!(f, "bad snapshot file magic"),
            Self::UnsupportedVersion => write!(f, "unsupported snapshot version"),
            Self::Io => write!(f, "snapshot i/o failed"),
        }
    }
}

/// An error returned by the state-history engine.
///
/// A failed capture or restore never corrupts the ring: new records are
/// committed only after every fallible step has succeeded.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct HistoryError {
    kind: HistoryErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl HistoryError {
    /// Creates a new history error from a known kind of error as well as an
    /// arbitrary error payload.
    pub(crate) fn new<E>(kind: HistoryErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`HistoryErrorKind`] for this error.
    pub fn kind(&self) -> HistoryErrorKind {
        self.kind
    }
}

impl From<HistoryErrorKind> for HistoryError {
    fn from(kind: HistoryErrorKind) -> Self {
        Self { kind, source: None }
    }
}

impl From<io::Error> for HistoryError {
    fn from(e: io::Error) -> Self {
        Self::new(HistoryErrorKind::Io, e)
    }
}
