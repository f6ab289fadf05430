//! Forwarding of the terminal input to the debugger.

use crate::bridge::exit::{ExitResult, ExitSender};
use crate::bridge::overwrite::OverwriteTable;
use crate::error::Error;
use crate::scan::{self, Scanner};
use crate::session::Session;
use log::{debug, error, info};
use nix::sys::signal::Signal;
use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// End-of-transmission, forwarded when the input reaches end-of-file (Ctrl-D).
pub const EOT: &str = "\x04";
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(100);
/// Number of input restarts allowed before the input is considered broken.
pub const DEFAULT_RESTART_BUDGET: u32 = 600;

/// Reads lines from an input, rewrites them and sends them to the session.
///
/// End-of-file on a terminal is not final (the user pressed Ctrl-D), so reading is restarted
/// after a short delay. An input that keeps returning end-of-file (closed pipe, detached
/// terminal) exhausts the restart budget: the debugger is terminated and the run ends
/// with [`Error::StdinLoop`].
pub struct StdinMultiplexer<R: Read> {
    reader: R,
    session: Arc<dyn Session>,
    overwrite: OverwriteTable,
    exit: ExitSender,
    restart_delay: Duration,
    budget: u32,
}

impl<R: Read> StdinMultiplexer<R> {
    pub fn new(
        reader: R,
        session: Arc<dyn Session>,
        overwrite: OverwriteTable,
        exit: ExitSender,
    ) -> Self {
        Self {
            reader,
            session,
            overwrite,
            exit,
            restart_delay: DEFAULT_RESTART_DELAY,
            budget: DEFAULT_RESTART_BUDGET,
        }
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn with_restart_budget(mut self, budget: u32) -> Self {
        self.budget = budget;
        self
    }

    /// Forward input until the restart budget is exhausted.
    pub fn run(self) {
        let Self {
            mut reader,
            session,
            overwrite,
            exit,
            restart_delay,
            mut budget,
        } = self;

        loop {
            let mut end_reason = None;
            for record in Scanner::new(&mut reader, scan::lines) {
                match record {
                    Ok(line) => {
                        let line = String::from_utf8_lossy(&line);
                        forward(session.as_ref(), &overwrite, &line)
                    }
                    Err(e) => {
                        end_reason = Some(e);
                        break;
                    }
                }
            }
            info!(target: "stdin", "stdin scanner exit, close stdin (err={end_reason:?})");

            if let Err(e) = session.write(EOT) {
                debug!(target: "stdin", "cannot send EOT: {e}");
            }
            thread::sleep(restart_delay);

            budget = budget.saturating_sub(1);
            if budget == 0 {
                error!(target: "stdin", "abnormal loop detected on stdin");
                if let Err(e) = session.send_signal(Signal::SIGTERM) {
                    error!(target: "stdin", "error while sending signal: {e}");
                }
                exit.post(ExitResult::from_error(Error::StdinLoop));
                return;
            }
        }
    }
}

fn forward(session: &dyn Session, overwrite: &OverwriteTable, line: &str) {
    let command = overwrite.apply(line);
    match session.write(&format!("{command}\n")) {
        Ok(()) => debug!(target: "stdin", "send: <{command}>"),
        Err(e) => error!(target: "stdin", "cannot send <{command}>: {e}"),
    }
}

impl<R: Read + Send + 'static> StdinMultiplexer<R> {
    /// Run the multiplexer in a background thread.
    pub fn spawn(self) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("xds-stdin".to_string())
            .spawn(move || self.run())
    }
}
