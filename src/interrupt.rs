//! Cooperative cancellation for blocking kernel calls.
//!
//! Every syscall wrapper in this crate runs the same loop: issue the call,
//! and on `EINTR` consult the [`Interrupt`] token before retrying. A raised
//! token abandons the operation and surfaces [`Error::Interrupted`] to the
//! caller, so a host embedding the library can stop a long traversal or a
//! slow xattr round-trip from a signal handler or another thread.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use crate::error::Error;
use crate::error::Result;

/// Cancellation token shared between the caller and in-flight operations.
///
/// Cloning is cheap and all clones observe the same state. The default token
/// never fires.
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    raised: Arc<AtomicBool>,
}

impl Interrupt {
    /// Creates a token in the not-raised state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of every operation holding a clone of this
    /// token. Idempotent; the flag is never cleared.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    /// Returns whether [`raise`](Self::raise) has been called.
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Fails with [`Error::Interrupted`] if the token has been raised.
    pub(crate) fn check(&self) -> Result<()> {
        if self.is_raised() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn raise_is_shared_and_sticky() {
        let token = Interrupt::new();
        let clone = token.clone();
        assert!(!clone.is_raised());
        token.raise();
        assert!(clone.is_raised());
        token.raise();
        assert!(token.check().is_err());
    }
}
