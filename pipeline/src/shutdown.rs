//! Cooperative shutdown: a signal sets a flag that long loops poll.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::{info, warn};

#[derive(Debug, Default)]
struct ShutdownState {
    requested: AtomicBool,
    reason: Mutex<Option<String>>,
    duplicates: AtomicU32,
}

/// Owner side: requests shutdown and installs the signal handler.
#[derive(Debug, Clone, Default)]
pub struct ShutdownController {
    state: Arc<ShutdownState>,
}

/// Read-only view handed to loops that need to stop early.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    state: Arc<ShutdownState>,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a shutdown request. Returns false for a duplicate, which is
    /// counted and otherwise ignored.
    pub fn request(&self, reason: &str) -> bool {
        if self.state.requested.swap(true, Ordering::SeqCst) {
            let count = self.state.duplicates.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(reason, duplicates = count, "shutdown already pending, ignoring signal");
            return false;
        }
        if let Ok(mut slot) = self.state.reason.lock() {
            *slot = Some(reason.to_string());
        }
        info!(reason, "shutdown requested, finishing current item");
        true
    }

    pub fn subscribe(&self) -> ShutdownToken {
        ShutdownToken {
            state: Arc::clone(&self.state),
        }
    }

    pub fn is_requested(&self) -> bool {
        self.state.requested.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        read_reason(&self.state)
    }

    pub fn duplicate_count(&self) -> u32 {
        self.state.duplicates.load(Ordering::SeqCst)
    }

    /// Route SIGINT (Ctrl-C) to [`ShutdownController::request`].
    ///
    /// Can only be installed once per process.
    pub fn install_signal_handler(&self) -> Result<()> {
        let controller = self.clone();
        ctrlc::set_handler(move || {
            controller.request("SIGINT");
        })
        .context("install SIGINT handler")
    }
}

impl ShutdownToken {
    pub fn is_requested(&self) -> bool {
        self.state.requested.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        if !self.is_requested() {
            return None;
        }
        // The flag is set before the reason is stored.
        Some(read_reason(&self.state).unwrap_or_else(|| "shutdown".to_string()))
    }
}

fn read_reason(state: &ShutdownState) -> Option<String> {
    state.reason.lock().ok().and_then(|slot| slot.clone())
}
