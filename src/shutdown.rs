//! Signal-driven cancellation for the frame loop.
#![allow(unsafe_code)]

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

use crate::foundation::error::{SlimeError, SlimeResult};

static SIGNAL_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_: libc::c_int) {
    SIGNAL_RECEIVED.store(true, Ordering::SeqCst);
}

/// Cancellation flag checked by the frame driver before every frame.
///
/// Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    watches_process: bool,
}

impl ShutdownSignal {
    /// A flag that only [`ShutdownSignal::request`] can set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route SIGINT and SIGTERM into the returned flag.
    ///
    /// Handlers are installed without `SA_RESTART`, so a blocking vblank wait returns early with
    /// `EINTR` and the loop observes the flag on its next check.
    pub fn install() -> SlimeResult<Self> {
        let action = SigAction::new(
            SigHandler::Handler(on_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );
        for sig in [Signal::SIGINT, Signal::SIGTERM] {
            // The handler only stores to an atomic, which is async-signal-safe.
            unsafe { sigaction(sig, &action) }
                .map_err(|e| SlimeError::setup(format!("install {sig} handler: {e}")))?;
        }
        tracing::debug!("SIGINT/SIGTERM handlers installed");
        Ok(Self {
            flag: Arc::new(AtomicBool::new(false)),
            watches_process: true,
        })
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || (self.watches_process && SIGNAL_RECEIVED.load(Ordering::SeqCst))
    }
}
