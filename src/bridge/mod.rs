//! Bridge between the terminal and a debugging session.
//!
//! [`Bridge::run`] initializes the session, wires session events to the terminal, starts the
//! debugger, forwards terminal input ([`stdin`]) and signals ([`signal`]) to it, then blocks
//! until one of the exit sources reports through the [`exit`] coordinator.

pub mod exit;
pub mod overwrite;
pub mod signal;
pub mod stdin;

#[cfg(test)]
mod fake;

use crate::bridge::exit::{ExitCoordinator, ExitResult, ExitSender};
use crate::bridge::overwrite::OverwriteTable;
use crate::bridge::signal::SignalRelay;
use crate::bridge::stdin::StdinMultiplexer;
use crate::error::Error;
use crate::session::{Init, Output, Session};
use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Shared terminal stream.
pub type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

fn sink(w: impl Write + Send + 'static) -> Sink {
    Arc::new(Mutex::new(Box::new(w)))
}

fn print(sink: &Sink, data: &str) {
    let mut w = sink.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = w.write_all(data.as_bytes()).and_then(|_| w.flush()) {
        warn!(target: "bridge", "cannot write to terminal: {e}");
    }
}

/// Build the message printed by gdb when a command file is missing.
pub fn command_file_error(file: &str) -> String {
    format!("{file}: No such file or directory.")
}

#[derive(Default)]
pub struct BridgeOptions {
    /// Terminal of the debugged program.
    pub inferior_tty: Option<PathBuf>,
    /// Command file given to gdb, its absence is reported as an error.
    pub command_file: Option<String>,
    pub overwrite: OverwriteTable,
    /// Forward signals received by this process to the debugger.
    pub relay_signals: bool,
}

pub struct Bridge {
    session: Arc<dyn Session>,
    options: BridgeOptions,
    stdout: Sink,
    stderr: Sink,
}

impl Bridge {
    pub fn new(session: Arc<dyn Session>, options: BridgeOptions) -> Self {
        Self {
            session,
            options,
            stdout: sink(std::io::stdout()),
            stderr: sink(std::io::stderr()),
        }
    }

    /// Replace the process terminal streams.
    pub fn with_terminal(
        mut self,
        stdout: impl Write + Send + 'static,
        stderr: impl Write + Send + 'static,
    ) -> Self {
        self.stdout = sink(stdout);
        self.stderr = sink(stderr);
        self
    }

    /// Run the session until it ends, return the exit result of the whole run.
    ///
    /// # Arguments
    ///
    /// * `input`: user input, usually the process stdin
    pub fn run<R: Read + Send + 'static>(self, input: R) -> ExitResult {
        match self.session.init() {
            Ok(Init::Ready) => {}
            Ok(Init::Report(report)) => {
                print(&self.stdout, &report);
                return ExitResult::new(None, 0);
            }
            Err(e) => return ExitResult::from_error(e),
        }

        let coordinator = ExitCoordinator::new();
        self.register_handlers(coordinator.sender());

        let inferior_tty = match self.options.inferior_tty.as_ref() {
            Some(path) => match self.open_inferior_tty(path) {
                Ok(()) => true,
                Err(e) => return self.finish(ExitResult::from_error(e), None),
            },
            None => false,
        };

        if let Err(e) = self.session.start(inferior_tty) {
            return self.finish(ExitResult::from_error(e), None);
        }
        info!(
            target: "bridge",
            "debugger started: {} {:?}", self.session.command(), self.session.arguments()
        );

        let multiplexer = StdinMultiplexer::new(
            input,
            self.session.clone(),
            self.options.overwrite.clone(),
            coordinator.sender(),
        );
        if let Err(e) = multiplexer.spawn() {
            return self.finish(ExitResult::from_error(e.into()), None);
        }

        let relay = if self.options.relay_signals {
            SignalRelay::start(self.session.clone(), signal::is_ignorable)
                .map_err(|e| warn!(target: "bridge", "signals are not forwarded: {e}"))
                .ok()
        } else {
            None
        };

        let result = coordinator.wait();
        match &result.error {
            None if result.code == 0 => info!(target: "bridge", "exit successfully"),
            None => info!(target: "bridge", "exit with code {}", result.code),
            Some(e) => info!(target: "bridge", "exit with code {} (error: {e})", result.code),
        }
        self.finish(result, relay)
    }

    fn finish(&self, result: ExitResult, relay: Option<SignalRelay>) -> ExitResult {
        if let Some(relay) = relay {
            relay.stop();
        }
        if let Err(e) = self.session.close() {
            warn!(target: "bridge", "close session: {e}");
        }
        result
    }

    fn register_handlers(&self, exit: ExitSender) {
        let stdout = self.stdout.clone();
        self.session.on_error(Box::new(move |err| {
            print(&stdout, &format!("ERROR: {err}\n"));
        }));

        let stdout = self.stdout.clone();
        let on_disconnect = exit.clone();
        self.session.on_disconnect(Box::new(move |err| {
            let err = err.map(|e| {
                print(&stdout, &format!("Disconnection: {e}\n"));
                Error::Disconnected(e.to_string())
            });
            on_disconnect.post(ExitResult::new(err, Errno::ESHUTDOWN as i32));
        }));

        let on_output = OutputRelay {
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            session: Arc::downgrade(&self.session),
            command_file_error: self.options.command_file.as_deref().map(command_file_error),
            exit: exit.clone(),
        };
        self.session.on_output(Box::new(move |out| on_output.relay(out)));

        self.session.on_exit(Box::new(move |code, err| {
            debug!(target: "bridge", "debugger exit event: code={code}, err={err:?}");
            let err = err.map(|e| Error::Remote(e.to_string()));
            exit.post(ExitResult::new(err, code));
        }));
    }

    fn open_inferior_tty(&self, path: &Path) -> Result<(), Error> {
        info!(target: "bridge", "client tty detected: {}", path.display());
        let tty: File = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| Error::InferiorTty {
                path: path.display().to_string(),
                source,
            })?;
        let tty = sink(tty);

        self.session.on_inferior_output(Box::new(move |out| {
            if !out.stdout.is_empty() {
                print(&tty, &out.stdout);
                debug!(target: "bridge", "inferior out: <{}>", out.stdout);
            }
            if !out.stderr.is_empty() {
                print(&tty, &out.stderr);
                debug!(target: "bridge", "inferior err: <{}>", out.stderr);
            }
        }));
        Ok(())
    }
}

/// Copy debugger output to the terminal and watch for a missing command file.
struct OutputRelay {
    stdout: Sink,
    stderr: Sink,
    session: Weak<dyn Session>,
    command_file_error: Option<String>,
    exit: ExitSender,
}

impl OutputRelay {
    fn relay(&self, out: &Output) {
        if !out.stdout.is_empty() {
            print(&self.stdout, &out.stdout);
            debug!(target: "bridge", "recv out: <{}>", out.stdout);
        }
        if !out.stderr.is_empty() {
            print(&self.stderr, &out.stderr);
            debug!(target: "bridge", "recv err: <{}>", out.stderr);
        }

        let Some(pattern) = self.command_file_error.as_ref() else {
            return;
        };
        if !out.stdout.contains(pattern.as_str()) {
            return;
        }

        print(&self.stderr, &format!("ERROR: {pattern}\n"));
        error!(target: "bridge", "ERROR: {pattern}");
        if let Some(session) = self.session.upgrade() {
            if let Err(e) = session.send_signal(Signal::SIGTERM) {
                error!(target: "bridge", "error while sending signal: {e}");
            }
        }
        self.exit
            .post(ExitResult::from_error(Error::CommandFile(pattern.clone())));
    }
}
