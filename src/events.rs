/*!
Cross-thread pause/quit flags.

The emulation thread polls these at scheduler synchronization points; the
input/event thread (or a signal handler in headless mode) writes them. They
are the only control-flow state shared between threads, and both sides
accept eventual visibility — a one-frame delay is fine — so relaxed atomics
are sufficient. No locks are ever held during emulation.
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct Events {
    paused: AtomicBool,
    quit: AtomicBool,
}

impl Events {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn toggle_paused(&self) {
        self.paused.fetch_xor(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_quit(&self) -> bool {
        self.quit.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn quit(&self) {
        self.quit.store(true, Ordering::Relaxed);
    }
}
