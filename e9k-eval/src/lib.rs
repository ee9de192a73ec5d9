//! Expression evaluation for the e9k debugger.
//!
//! Implements the `print`/`write` expression language over the debug-info
//! index and live emulator state. The grammar, lowest precedence first:
//!
//! ```text
//! expr     := postfix
//! postfix  := unary ( '.' ident | '->' ident | '[' number ']' )*
//! unary    := '&' unary | '*' unary | primary
//! primary  := '(' expr ')' | identifier | number
//! ```
//!
//! Identifiers resolve in a fixed order — global variable, then linker
//! symbol, then register (case-insensitive), then frame local — and the
//! first match wins. Evaluation is single-pass: the parser produces
//! [`Value`]s directly rather than an AST, and a *type-only* mode walks
//! the same grammar without touching emulator state, which is what member
//! completion uses.

use std::fmt;

use thiserror::Error;

mod complete;
mod eval;
mod machine;
mod printer;
mod value;

pub use crate::complete::complete;
pub use crate::eval::{evaluate, resolve_address};
pub use crate::machine::Machine;
pub use crate::printer::print_value;
pub use crate::value::{Place, Value};

/// The error kind for [`EvalError`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvalErrorKind {
    /// The expression is syntactically malformed.
    Parse,

    /// A name did not resolve, or an operator was applied to an
    /// incompatible value.
    Resolution,

    /// Guest memory needed by the evaluation was unreadable.
    Memory,
}

impl fmt::Display for EvalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse => write!(f, "malformed expression"),
            Self::Resolution => write!(f, "unresolved expression"),
            Self::Memory => write!(f, "unreadable memory"),
        }
    }
}

/// An error produced while parsing or evaluating an expression.
#[derive(Debug, Error)]
#[error("{kind}{}", .context.as_deref().map(|c| format!(": {c}")).unwrap_or_default())]
pub struct EvalError {
    kind: EvalErrorKind,
    context: Option<String>,
}

impl EvalError {
    pub(crate) fn new(kind: EvalErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: Some(context.into()),
        }
    }

    /// Returns the corresponding [`EvalErrorKind`] for this error.
    pub fn kind(&self) -> EvalErrorKind {
        self.kind
    }
}

impl From<EvalErrorKind> for EvalError {
    fn from(kind: EvalErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }
}
