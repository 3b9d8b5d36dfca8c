//! Compiled program objects.

use super::types::ProgramHandle;

/// A compiled-and-linked GPU program, or the record of its failure.
///
/// A failed program is not fatal to the process: the pass that owns it
/// draws nothing and every other pass keeps running.
#[derive(Debug)]
pub struct Program {
    handle: ProgramHandle,
    errors: Option<Vec<String>>,
}

impl Program {
    pub(crate) fn linked(handle: ProgramHandle) -> Self {
        Self {
            handle,
            errors: None,
        }
    }

    pub(crate) fn failed(handle: ProgramHandle, log: String) -> Self {
        Self {
            handle,
            errors: Some(log.lines().map(str::to_string).collect()),
        }
    }

    #[must_use]
    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }

    /// Compile/link info log, present only on failure.
    #[must_use]
    pub fn errors(&self) -> Option<&[String]> {
        self.errors.as_deref()
    }

    /// `false` turns the owning pass into a no-op.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.errors.is_none()
    }
}
