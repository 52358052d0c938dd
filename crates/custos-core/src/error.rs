//! Error classes shared by every pipeline error type.
//!
//! Each error enum in this crate (and in `custos-store`) reports which class
//! it belongs to, so the frame loop can decide whether to log and continue
//! or to surface the failure to the operator.

/// How a failure must be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Single-frame capture or inference failure. Log and move to the next frame.
    Transient,
    /// Missing model, untrained classifier, empty enrollment set, malformed input.
    /// Training and recognition refuse to start.
    Configuration,
    /// Uniqueness violation on enrollment. Rejected before any capture side effects.
    Integrity,
}

impl ErrorClass {
    pub fn is_transient(self) -> bool {
        self == ErrorClass::Transient
    }
}

/// Implemented by every error type that can reach the frame loop.
pub trait Classified {
    fn class(&self) -> ErrorClass;
}
