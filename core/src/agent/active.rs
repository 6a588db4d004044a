use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::runner::{ManagedProcess, Signal};

/// Commands currently executing, keyed by a per-delivery ticket so the same
/// command id delivered twice is tracked twice.
#[derive(Default)]
pub struct ActiveCommands {
    entries: Mutex<BTreeMap<u64, Entry>>,
    next_ticket: AtomicU64,
}

struct Entry {
    command_id: String,
    process: Arc<ManagedProcess>,
}

/// Removes its entry from the set when dropped.
pub struct ActiveGuard {
    set: Arc<ActiveCommands>,
    ticket: u64,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.ticket);
    }
}

impl ActiveCommands {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn track(self: &Arc<Self>, command_id: &str, process: Arc<ManagedProcess>) -> ActiveGuard {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(
            ticket,
            Entry {
                command_id: command_id.to_string(),
                process,
            },
        );
        ActiveGuard {
            set: self.clone(),
            ticket,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Command ids in the order they started.
    pub fn ids(&self) -> Vec<String> {
        self.lock().values().map(|e| e.command_id.clone()).collect()
    }

    /// Ask every tracked process to stop. Returns how many were signalled.
    pub fn cancel_all(&self, signal: Signal) -> usize {
        let entries = self.lock();
        for entry in entries.values() {
            entry.process.cancel(signal);
        }
        entries.len()
    }

    /// Poll until empty or `timeout` elapses. Returns true if it emptied.
    pub async fn wait_idle(&self, timeout: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_empty() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_removes_on_drop_and_allows_duplicates() {
        let set = ActiveCommands::new();
        let a = set.track("c1", Arc::new(ManagedProcess::new()));
        let b = set.track("c1", Arc::new(ManagedProcess::new()));
        let c = set.track("c2", Arc::new(ManagedProcess::new()));
        assert_eq!(set.ids(), vec!["c1", "c1", "c2"]);

        drop(a);
        assert_eq!(set.len(), 2);
        drop(b);
        drop(c);
        assert!(set.is_empty());
    }

    #[test]
    fn cancel_all_signals_every_process() {
        let set = ActiveCommands::new();
        let p1 = Arc::new(ManagedProcess::new());
        let p2 = Arc::new(ManagedProcess::new());
        let _g1 = set.track("c1", p1.clone());
        let _g2 = set.track("c2", p2.clone());

        assert_eq!(set.cancel_all(Signal::Term), 2);
        assert_eq!(p1.cancel_requested(), Some(Signal::Term));
        assert_eq!(p2.cancel_requested(), Some(Signal::Term));
    }

    #[tokio::test]
    async fn wait_idle_times_out_then_succeeds() {
        let set = ActiveCommands::new();
        let guard = set.track("c1", Arc::new(ManagedProcess::new()));

        let idle = set
            .wait_idle(Duration::from_millis(50), Duration::from_millis(10))
            .await;
        assert!(!idle);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(guard);
        });
        let idle = set
            .wait_idle(Duration::from_secs(2), Duration::from_millis(10))
            .await;
        assert!(idle);
    }
}
