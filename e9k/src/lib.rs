//! The e9k debugger crates under one namespace.
//!
//! - [`common`]: shared target vocabulary (addresses, widths, registers).
//! - [`history`]: the rolling keyframe+delta state ring.
//! - [`host`]: the bridge to a dynamically loaded emulator core.
//! - [`debuginfo`]: symbols, DWARF, STABS and CFI from toolchain dumps.
//! - [`eval`]: the `print`/`write` expression language.

pub use e9k_common as common;
pub use e9k_debuginfo as debuginfo;
pub use e9k_eval as eval;
pub use e9k_history as history;
pub use e9k_host as host;
