//! Exit coordinator: several concurrent sources may end the run, the first one wins.

use crate::error::Error;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Outcome of a run: an optional error and the process exit code.
#[derive(Debug)]
pub struct ExitResult {
    pub error: Option<Error>,
    pub code: i32,
}

impl ExitResult {
    pub fn new(error: Option<Error>, code: i32) -> Self {
        Self { error, code }
    }

    /// Result with an exit code taken from the error itself.
    pub fn from_error(error: Error) -> Self {
        let code = error.exit_code();
        Self {
            error: Some(error),
            code,
        }
    }
}

/// Posting side of the coordinator, cheap to clone and safe to use from any thread.
#[derive(Clone)]
pub struct ExitSender {
    posted: Arc<AtomicBool>,
    tx: SyncSender<ExitResult>,
}

impl ExitSender {
    /// Post an exit result. Only the first post is kept, next ones are dropped (never blocks).
    /// Return true if this result was kept.
    pub fn post(&self, result: ExitResult) -> bool {
        if self.posted.swap(true, Ordering::SeqCst) {
            debug!(
                target: "bridge",
                "exit already requested, drop result (code={}, err={:?})", result.code, result.error
            );
            return false;
        }
        if let Err(e) = self.tx.try_send(result) {
            warn!(target: "bridge", "cannot post exit result: {e}");
            return false;
        }
        true
    }
}

/// Consuming side of the coordinator.
pub struct ExitCoordinator {
    sender: ExitSender,
    rx: Mutex<Receiver<ExitResult>>,
}

impl Default for ExitCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ExitCoordinator {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::sync_channel(1);
        Self {
            sender: ExitSender {
                posted: Arc::new(AtomicBool::new(false)),
                tx,
            },
            rx: Mutex::new(rx),
        }
    }

    pub fn sender(&self) -> ExitSender {
        self.sender.clone()
    }

    /// Block until an exit result is posted.
    pub fn wait(&self) -> ExitResult {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        // coordinator keeps a sender alive, so recv never fails on disconnection
        rx.recv()
            .unwrap_or_else(|_| ExitResult::from_error(Error::ChannelClosed))
    }

    /// Wait for an exit result at most `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExitResult> {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        match rx.recv_timeout(timeout) {
            Ok(res) => Some(res),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                Some(ExitResult::from_error(Error::ChannelClosed))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nix::errno::Errno;
    use std::thread;

    #[test]
    fn test_first_post_wins() {
        let coordinator = ExitCoordinator::new();
        let sender = coordinator.sender();
        assert!(sender.post(ExitResult::new(None, 3)));
        assert!(!sender.post(ExitResult::from_error(Error::StdinLoop)));
        assert!(!coordinator.sender().post(ExitResult::new(None, 0)));

        let res = coordinator.wait();
        assert_eq!(res.code, 3);
        assert!(res.error.is_none());
        assert!(coordinator.wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_concurrent_posts_never_block() {
        let coordinator = ExitCoordinator::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let sender = coordinator.sender();
                thread::spawn(move || sender.post(ExitResult::new(None, i)))
            })
            .collect();
        let kept = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|kept| *kept)
            .count();
        assert_eq!(kept, 1);
        assert!(coordinator.wait_timeout(Duration::from_secs(1)).is_some());
    }

    #[test]
    fn test_wait_timeout_without_post() {
        let coordinator = ExitCoordinator::new();
        assert!(coordinator.wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_result_from_error() {
        let res = ExitResult::from_error(Error::StdinLoop);
        assert_eq!(res.code, Errno::ELOOP as i32);
    }
}
