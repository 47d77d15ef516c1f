//! Read/write access guard for the analytical store
//!
//! Many concurrent readers or one exclusive writer. The underlying
//! `parking_lot::RwLock` is task-fair, so a waiting writer blocks new
//! readers and cannot be starved. Counters make the current state observable.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct AccessGuard {
    lock: RwLock<()>,
    active_readers: AtomicUsize,
    writer_active: AtomicBool,
    reads_completed: AtomicU64,
    writes_completed: AtomicU64,
}

/// Observable guard state
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GuardState {
    pub active_readers: usize,
    pub writer_active: bool,
    pub reads_completed: u64,
    pub writes_completed: u64,
}

struct ReaderCount<'a>(&'a AccessGuard);

impl Drop for ReaderCount<'_> {
    fn drop(&mut self) {
        self.0.active_readers.fetch_sub(1, Ordering::SeqCst);
        self.0.reads_completed.fetch_add(1, Ordering::Relaxed);
    }
}

struct WriterFlag<'a>(&'a AccessGuard);

impl Drop for WriterFlag<'_> {
    fn drop(&mut self) {
        self.0.writer_active.store(false, Ordering::SeqCst);
        self.0.writes_completed.fetch_add(1, Ordering::Relaxed);
    }
}

impl AccessGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with shared access
    pub fn with_read_access<R>(&self, f: impl FnOnce() -> R) -> R {
        let _lock = self.lock.read();
        self.active_readers.fetch_add(1, Ordering::SeqCst);
        let _count = ReaderCount(self);
        f()
    }

    /// Run `f` with exclusive access
    pub fn with_write_access<R>(&self, f: impl FnOnce() -> R) -> R {
        let _lock = self.lock.write();
        self.writer_active.store(true, Ordering::SeqCst);
        let _flag = WriterFlag(self);
        f()
    }

    pub fn active_readers(&self) -> usize {
        self.active_readers.load(Ordering::SeqCst)
    }

    pub fn writer_active(&self) -> bool {
        self.writer_active.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> GuardState {
        GuardState {
            active_readers: self.active_readers(),
            writer_active: self.writer_active(),
            reads_completed: self.reads_completed.load(Ordering::Relaxed),
            writes_completed: self.writes_completed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_readers_overlap() {
        let guard = Arc::new(AccessGuard::new());
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let guard = guard.clone();
                let max_seen = max_seen.clone();
                thread::spawn(move || {
                    guard.with_read_access(|| {
                        thread::sleep(Duration::from_millis(100));
                        max_seen.fetch_max(guard.active_readers(), Ordering::SeqCst);
                    })
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) > 1);
        assert_eq!(guard.active_readers(), 0);
        assert_eq!(guard.state().reads_completed, 4);
    }

    #[test]
    fn test_writer_is_exclusive() {
        let guard = Arc::new(AccessGuard::new());
        let violations = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..8 {
            let guard = guard.clone();
            let violations = violations.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..20 {
                    if i % 2 == 0 {
                        guard.with_write_access(|| {
                            if guard.active_readers() != 0 {
                                violations.fetch_add(1, Ordering::SeqCst);
                            }
                            thread::sleep(Duration::from_micros(200));
                        });
                    } else {
                        guard.with_read_access(|| {
                            if guard.writer_active() {
                                violations.fetch_add(1, Ordering::SeqCst);
                            }
                            thread::sleep(Duration::from_micros(200));
                        });
                    }
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(violations.load(Ordering::SeqCst), 0);
        let state = guard.state();
        assert!(!state.writer_active);
        assert_eq!(state.writes_completed, 80);
        assert_eq!(state.reads_completed, 80);
    }

    #[test]
    fn test_counters_reset_after_panic() {
        let guard = Arc::new(AccessGuard::new());
        let g = guard.clone();
        let result = thread::spawn(move || {
            g.with_write_access(|| panic!("boom"));
        })
        .join();

        assert!(result.is_err());
        assert!(!guard.writer_active());
        // Lock must still be usable
        assert_eq!(guard.with_read_access(|| 7), 7);
    }
}
