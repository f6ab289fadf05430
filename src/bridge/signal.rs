//! Relay of the signals received by xds-gdb to the debugger.

use crate::error::Error;
use crate::session::Session;
use log::{debug, error};
use nix::sys::signal::Signal;
use signal_hook::consts::FORBIDDEN;
use signal_hook::iterator::{Handle, Signals};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Predicate for signals that must not be forwarded.
pub type IgnoreFn = fn(Signal) -> bool;

/// Terminal resizes concern xds-gdb only, child exits come from the local debugger itself.
pub fn is_ignorable(signal: Signal) -> bool {
    matches!(signal, Signal::SIGWINCH | Signal::SIGCHLD)
}

/// Every signal that may be caught by a process.
pub fn catchable_signals() -> Vec<i32> {
    Signal::iterator()
        .map(|s| s as i32)
        .filter(|s| !FORBIDDEN.contains(s))
        .collect()
}

/// Background relay, stops on [`SignalRelay::stop`].
pub struct SignalRelay {
    handle: Handle,
    thread: JoinHandle<()>,
}

impl SignalRelay {
    /// Subscribe to all catchable signals and forward them to the session.
    ///
    /// # Arguments
    ///
    /// * `session`: signal receiver
    /// * `is_ignorable`: filter for signals that are not forwarded
    pub fn start(session: Arc<dyn Session>, is_ignorable: IgnoreFn) -> Result<Self, Error> {
        let mut signals = Signals::new(catchable_signals())?;
        let handle = signals.handle();

        let thread = thread::Builder::new()
            .name("xds-signal".to_string())
            .spawn(move || {
                for raw in signals.forever() {
                    let signal = match Signal::try_from(raw) {
                        Ok(s) => s,
                        Err(_) => continue,
                    };
                    if is_ignorable(signal) {
                        debug!(target: "signal", "ignore {signal}");
                        continue;
                    }
                    debug!(target: "signal", "forward {signal}");
                    if let Err(e) = session.send_signal(signal) {
                        error!(target: "signal", "error while sending signal: {e}");
                    }
                }
            })?;

        Ok(Self { handle, thread })
    }

    pub fn stop(self) {
        self.handle.close();
        _ = self.thread.join();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bridge::fake::FakeSession;
    use nix::sys::signal::raise;
    use serial_test::serial;
    use std::time::{Duration, Instant};

    #[test]
    fn test_catchable_signals() {
        let signals = catchable_signals();
        assert!(signals.contains(&(Signal::SIGINT as i32)));
        assert!(signals.contains(&(Signal::SIGWINCH as i32)));
        assert!(!signals.contains(&(Signal::SIGKILL as i32)));
        assert!(!signals.contains(&(Signal::SIGSTOP as i32)));
    }

    #[test]
    fn test_ignorable() {
        assert!(is_ignorable(Signal::SIGWINCH));
        assert!(!is_ignorable(Signal::SIGINT));
        assert!(!is_ignorable(Signal::SIGTERM));
    }

    #[test]
    #[serial]
    fn test_relay_forwards_and_filters() {
        let session = Arc::new(FakeSession::default());
        let relay = SignalRelay::start(session.clone(), is_ignorable).unwrap();

        raise(Signal::SIGWINCH).unwrap();
        raise(Signal::SIGUSR1).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while session.signals().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        relay.stop();

        assert_eq!(session.signals(), vec![Signal::SIGUSR1]);
    }
}
