use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts the native-resource holders (encoder workers, muxer, fetcher)
/// alive for one assembly run. Every acquisition returns a guard that
/// decrements on drop, so the count reads zero exactly when every exit
/// path has released what it held.
#[derive(Clone, Debug, Default)]
pub struct ResourceGauge {
    live: Arc<AtomicUsize>,
}

impl ResourceGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, label: &'static str) -> ResourceGuard {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(label, live, "resource acquired");
        ResourceGuard {
            live: Arc::clone(&self.live),
            label,
        }
    }

    /// Number of currently held resources.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct ResourceGuard {
    live: Arc<AtomicUsize>,
    label: &'static str,
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        let live = self.live.fetch_sub(1, Ordering::SeqCst) - 1;
        tracing::trace!(label = self.label, live, "resource released");
    }
}
