//! In-memory session used by bridge tests.

use crate::error::Error;
use crate::session::{ConfigValue, Handlers, Init, Session};
use nix::sys::signal::Signal;
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeSession {
    pub handlers: Handlers,
    pub report: Option<String>,
    pub fail_start: bool,
    pub written: Mutex<Vec<String>>,
    pub signals: Mutex<Vec<Signal>>,
    pub started: Mutex<Option<bool>>,
    pub closed: Mutex<bool>,
}

impl FakeSession {
    pub fn written(&self) -> Vec<String> {
        self.written.lock().unwrap().clone()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap().clone()
    }

    /// Value of `inferior_tty` given on start, `None` if not started.
    pub fn started(&self) -> Option<bool> {
        *self.started.lock().unwrap()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

impl Session for FakeSession {
    fn init(&self) -> Result<Init, Error> {
        Ok(match &self.report {
            Some(r) => Init::Report(r.clone()),
            None => Init::Ready,
        })
    }

    fn close(&self) -> Result<(), Error> {
        self.handlers.clear();
        *self.closed.lock().unwrap() = true;
        Ok(())
    }

    fn set_config(&self, name: &str, _value: ConfigValue) -> Result<(), Error> {
        Err(Error::UnknownField(name.to_string()))
    }

    fn start(&self, inferior_tty: bool) -> Result<(), Error> {
        if self.fail_start {
            return Err(Error::MissingCmdId);
        }
        *self.started.lock().unwrap() = Some(inferior_tty);
        Ok(())
    }

    fn command(&self) -> &str {
        "fake"
    }

    fn arguments(&self) -> &[String] {
        &[]
    }

    fn environment(&self) -> &[String] {
        &[]
    }

    fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    fn write(&self, data: &str) -> Result<(), Error> {
        self.written.lock().unwrap().push(data.to_string());
        Ok(())
    }

    fn send_signal(&self, signal: Signal) -> Result<(), Error> {
        self.signals.lock().unwrap().push(signal);
        Ok(())
    }
}
