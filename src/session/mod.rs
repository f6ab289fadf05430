//! Debugging sessions.
//!
//! A [`Session`] bridges the terminal with a debugger backend. Two backends exist:
//! [`native::NativeSession`] runs gdb as a local child process attached to a pseudo-terminal,
//! [`remote::RemoteSession`] runs gdb on a remote XDS agent and talks to it over HTTP and a
//! websocket event channel. The backend is chosen once at startup with [`Backend`].

pub mod native;
pub mod remote;

use crate::error::Error;
use nix::sys::signal::Signal;
use std::sync::{Arc, PoisonError, RwLock};

/// A piece of debugger (or inferior) output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Output {
    pub timestamp: String,
    pub stdout: String,
    pub stderr: String,
}

pub type ErrorHandler = Box<dyn Fn(&Error) + Send + Sync>;
/// Called with the reason of a disconnection, `None` if the backend ended cleanly.
pub type DisconnectHandler = Box<dyn Fn(Option<&Error>) + Send + Sync>;
/// Called with the debugger exit code and an optional error reported by the backend.
pub type ExitHandler = Box<dyn Fn(i32, Option<&Error>) + Send + Sync>;
pub type OutputHandler = Box<dyn Fn(&Output) + Send + Sync>;

/// Result of a successful session initialization.
#[derive(Debug, PartialEq)]
pub enum Init {
    /// Session is ready to start the debugger.
    Ready,
    /// Session can be used for discovery only, contains a human-readable report.
    Report(String),
}

/// Configuration value accepted by [`Session::set_config`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Str(String),
    Bool(bool),
}

impl ConfigValue {
    pub fn into_string(self, name: &str) -> Result<String, Error> {
        match self {
            ConfigValue::Str(s) => Ok(s),
            ConfigValue::Bool(_) => Err(Error::InvalidConfigValue {
                name: name.to_string(),
                expected: "string",
            }),
        }
    }

    pub fn into_bool(self, name: &str) -> Result<bool, Error> {
        match self {
            ConfigValue::Bool(b) => Ok(b),
            ConfigValue::Str(_) => Err(Error::InvalidConfigValue {
                name: name.to_string(),
                expected: "boolean",
            }),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Str(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Str(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

#[derive(Default)]
struct Slots {
    error: Option<ErrorHandler>,
    disconnect: Option<DisconnectHandler>,
    exit: Option<ExitHandler>,
    output: Option<OutputHandler>,
    inferior_output: Option<OutputHandler>,
}

/// Event handler slots of a session.
///
/// Handlers are invoked under a read lock, [`Handlers::clear`] takes the write lock, so
/// once `clear` returns no handler is running and none will run again.
#[derive(Default)]
pub struct Handlers {
    slots: RwLock<Slots>,
}

macro_rules! emit {
    ($self: ident, $slot: ident, $($arg: expr),*) => {{
        let slots = $self.slots.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(handler) = slots.$slot.as_ref() {
            handler($($arg),*);
        }
    }};
}

impl Handlers {
    fn update(&self, f: impl FnOnce(&mut Slots)) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut slots)
    }

    pub fn set_error(&self, f: ErrorHandler) {
        self.update(|s| s.error = Some(f))
    }

    pub fn set_disconnect(&self, f: DisconnectHandler) {
        self.update(|s| s.disconnect = Some(f))
    }

    pub fn set_exit(&self, f: ExitHandler) {
        self.update(|s| s.exit = Some(f))
    }

    pub fn set_output(&self, f: OutputHandler) {
        self.update(|s| s.output = Some(f))
    }

    pub fn set_inferior_output(&self, f: OutputHandler) {
        self.update(|s| s.inferior_output = Some(f))
    }

    /// Remove all handlers.
    pub fn clear(&self) {
        self.update(|s| *s = Slots::default())
    }

    pub fn is_empty(&self) -> bool {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.error.is_none()
            && slots.disconnect.is_none()
            && slots.exit.is_none()
            && slots.output.is_none()
            && slots.inferior_output.is_none()
    }

    pub fn error(&self, err: &Error) {
        emit!(self, error, err)
    }

    pub fn disconnect(&self, err: Option<&Error>) {
        emit!(self, disconnect, err)
    }

    pub fn exit(&self, code: i32, err: Option<&Error>) {
        emit!(self, exit, code, err)
    }

    pub fn output(&self, out: &Output) {
        emit!(self, output, out)
    }

    pub fn inferior_output(&self, out: &Output) {
        emit!(self, inferior_output, out)
    }
}

/// Contract shared by all debugger backends.
///
/// Handlers are always invoked from background threads. Once a disconnect or an exit event
/// fired, further `write` and `send_signal` calls are not guaranteed to succeed.
pub trait Session: Send + Sync {
    /// Prepare the session, nothing is executed yet.
    fn init(&self) -> Result<Init, Error>;

    /// Release session resources, no handler is called after this returns.
    fn close(&self) -> Result<(), Error>;

    /// Set a backend specific configuration field.
    fn set_config(&self, name: &str, value: ConfigValue) -> Result<(), Error>;

    /// Start the debugger.
    ///
    /// # Arguments
    ///
    /// * `inferior_tty`: true if the debugged program output must be relayed separately
    fn start(&self, inferior_tty: bool) -> Result<(), Error>;

    fn command(&self) -> &str;

    fn arguments(&self) -> &[String];

    fn environment(&self) -> &[String];

    fn handlers(&self) -> &Handlers;

    fn on_error(&self, f: ErrorHandler) {
        self.handlers().set_error(f)
    }

    fn on_disconnect(&self, f: DisconnectHandler) {
        self.handlers().set_disconnect(f)
    }

    fn on_exit(&self, f: ExitHandler) {
        self.handlers().set_exit(f)
    }

    fn on_output(&self, f: OutputHandler) {
        self.handlers().set_output(f)
    }

    fn on_inferior_output(&self, f: OutputHandler) {
        self.handlers().set_inferior_output(f)
    }

    /// Send data to the debugger stdin.
    fn write(&self, data: &str) -> Result<(), Error>;

    /// Forward a signal to the debugger.
    fn send_signal(&self, signal: Signal) -> Result<(), Error>;
}

/// Debugger backend choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Local gdb started on a pseudo-terminal.
    Native { program: String },
    Remote,
}

impl Backend {
    /// Create a session of this backend kind.
    pub fn create(self, args: Vec<String>, env: Vec<String>) -> Arc<dyn Session> {
        match self {
            Backend::Native { program } => {
                Arc::new(native::NativeSession::with_program(program, args, env))
            }
            Backend::Remote => Arc::new(remote::RemoteSession::new(args, env)),
        }
    }
}
