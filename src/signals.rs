//! Keyboard interrupts as polled events.
//!
//! The handler installed for `SIGINT` only sets an atomic flag. The
//! interactive loop polls the flag at the prompt, and the interpreter drops
//! interrupts that arrived while it was waiting for a foreground child (the
//! child received the same signal and handled it with its own disposition).

use nix::sys::signal::{SigHandler, Signal, signal};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub struct Interrupts {
    pending: Arc<AtomicBool>,
}

impl Interrupts {
    /// Flag that is never set by a signal.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Register the flag as the shell's `SIGINT` handler.
    pub fn install() -> io::Result<Self> {
        let interrupts = Self::default();
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupts.pending))?;
        Ok(interrupts)
    }

    /// Consume a pending interrupt, returning whether there was one.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }

    /// Record an interrupt as the signal handler would.
    pub fn raise(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }
}

/// Give `SIGINT` its default disposition in a freshly forked child, so the
/// command it runs can be interrupted whatever the shell installed.
pub fn restore_default_interrupt() {
    // SAFETY: SigDfl installs no Rust handler; called in a single-threaded
    // child right after fork.
    if let Err(e) = unsafe { signal(Signal::SIGINT, SigHandler::SigDfl) } {
        tracing::warn!("cannot restore SIGINT disposition: {}", e);
    }
}
