use crate::error::Error;
use crate::scan::{self, Scanner, Utf8Decoder};
use crate::session::{ConfigValue, Handlers, Init, Output, Session};
use log::{debug, info, warn};
use nix::errno::Errno;
use nix::libc;
use nix::pty::openpty;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{setsid, Pid};
use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// Debugger used when no other program is given.
pub const DEFAULT_GDB: &str = "/usr/bin/gdb";
/// Period of the debugger exit check.
const REAP_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Initialized,
    Running,
    Closed,
}

/// Debugger process as seen by signal senders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Process {
    NotStarted,
    Alive(Pid),
    /// Reaped, the pid may belong to another process now.
    Finished,
}

struct Inner {
    state: State,
    executable: Option<PathBuf>,
    pty: Option<Arc<File>>,
}

/// Session with a gdb running as a local child process attached to a pseudo-terminal.
pub struct NativeSession {
    program: String,
    args: Vec<String>,
    env: Vec<String>,
    handlers: Arc<Handlers>,
    running: Arc<AtomicBool>,
    /// Reaping and signalling are serialized by this lock.
    process: Arc<Mutex<Process>>,
    inner: Mutex<Inner>,
}

impl NativeSession {
    /// Create new session for the default gdb, but don't start it.
    ///
    /// # Arguments
    ///
    /// * `args`: gdb arguments
    /// * `env`: environment assignments (`NAME=value`) applied on top of the inherited ones
    pub fn new(args: Vec<String>, env: Vec<String>) -> Self {
        Self::with_program(DEFAULT_GDB, args, env)
    }

    /// Create new session for an arbitrary debugger program.
    pub fn with_program(program: impl Into<String>, args: Vec<String>, env: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env,
            handlers: Arc::new(Handlers::default()),
            running: Arc::new(AtomicBool::new(false)),
            process: Arc::new(Mutex::new(Process::NotStarted)),
            inner: Mutex::new(Inner {
                state: State::Created,
                executable: None,
                pty: None,
            }),
        }
    }

    pub fn state(&self) -> State {
        self.lock().state
    }

    /// Return true while the debugger process is alive and the session is not closed.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn(&self, executable: &PathBuf) -> Result<(Child, File), Error> {
        let spawn_err = |source| Error::Spawn {
            program: executable.display().to_string(),
            source,
        };

        let pty = openpty(None, None).map_err(|e| spawn_err(e.into()))?;

        let mut cmd = Command::new(executable);
        cmd.args(&self.args)
            .envs(env_pairs(&self.env))
            .stdin(Stdio::from(pty.slave.try_clone().map_err(spawn_err)?))
            .stdout(Stdio::from(pty.slave.try_clone().map_err(spawn_err)?))
            .stderr(Stdio::from(pty.slave));

        unsafe {
            cmd.pre_exec(|| {
                // new session with the pty slave (already dup'ed on stdin) as controlling terminal
                setsid()?;
                if libc::ioctl(0, libc::TIOCSCTTY as _, 0) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(spawn_err)?;
        // command holds the slave end, it must be closed here,
        // otherwise reading from master never ends
        drop(cmd);

        Ok((child, File::from(pty.master)))
    }
}

/// Wait for the debugger exit. The process is marked finished under the lock that signal
/// senders take, before its pid is released by the reaping.
fn reap(mut child: Child, process: &Mutex<Process>) -> std::io::Result<std::process::ExitStatus> {
    loop {
        {
            let mut process = process.lock().unwrap_or_else(PoisonError::into_inner);
            match child.try_wait() {
                Ok(Some(status)) => {
                    *process = Process::Finished;
                    return Ok(status);
                }
                Ok(None) => {}
                Err(e) => {
                    *process = Process::Finished;
                    return Err(e);
                }
            }
        }
        thread::sleep(REAP_INTERVAL);
    }
}

fn emit_output(handlers: &Handlers, text: String) {
    if text.is_empty() {
        return;
    }
    handlers.output(&Output {
        timestamp: chrono::Local::now().to_rfc3339(),
        stdout: text,
        stderr: String::new(),
    })
}

/// Split `NAME=value` assignments, malformed entries are skipped.
fn env_pairs(env: &[String]) -> impl Iterator<Item = (&str, &str)> {
    env.iter().filter_map(|assignment| {
        let pair = assignment.split_once('=');
        if pair.is_none() {
            warn!(target: "session", "skip malformed environment entry `{assignment}`");
        }
        pair
    })
}

/// Pty master reader: EIO means that the slave side is closed, this is an end-of-file.
struct PtyReader(File);

impl Read for PtyReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.0.read(buf) {
            Err(e) if e.raw_os_error() == Some(Errno::EIO as i32) => Ok(0),
            res => res,
        }
    }
}

impl Session for NativeSession {
    fn init(&self) -> Result<Init, Error> {
        let mut inner = self.lock();
        let executable = match which::which(&self.program) {
            Ok(path) => path,
            Err(e) => {
                warn!(target: "session", "cannot resolve `{}`: {e}", self.program);
                PathBuf::from(&self.program)
            }
        };
        info!(target: "session", "native debugger: {} {:?}", executable.display(), self.args);
        inner.executable = Some(executable);
        inner.state = State::Initialized;
        Ok(Init::Ready)
    }

    fn close(&self) -> Result<(), Error> {
        self.handlers.clear();
        self.running.store(false, Ordering::SeqCst);
        self.lock().state = State::Closed;
        Ok(())
    }

    fn set_config(&self, name: &str, _value: ConfigValue) -> Result<(), Error> {
        Err(Error::UnknownField(name.to_string()))
    }

    fn start(&self, inferior_tty: bool) -> Result<(), Error> {
        let mut inner = self.lock();
        let executable = match (inner.state, inner.executable.as_ref()) {
            (State::Initialized, Some(exe)) => exe.clone(),
            _ => return Err(Error::NotInitialized),
        };
        if inferior_tty {
            debug!(target: "session", "native gdb manages the inferior tty by itself");
        }

        let (child, pty) = self.spawn(&executable)?;
        let reader = pty.try_clone()?;
        *self.process.lock().unwrap_or_else(PoisonError::into_inner) =
            Process::Alive(Pid::from_raw(child.id() as i32));
        inner.pty = Some(Arc::new(pty));
        inner.state = State::Running;
        self.running.store(true, Ordering::SeqCst);

        // monitor debugger process exit
        {
            let handlers = self.handlers.clone();
            let running = self.running.clone();
            let process = self.process.clone();
            thread::spawn(move || {
                let err = match reap(child, &process) {
                    Ok(status) if status.success() => None,
                    Ok(status) => Some(Error::DebuggerExit(status)),
                    Err(e) => Some(Error::IO(e)),
                };
                debug!(target: "session", "debugger process ended (err={err:?})");
                handlers.disconnect(err.as_ref());
                running.store(false, Ordering::SeqCst);
            });
        }

        // relay debugger output
        {
            let handlers = self.handlers.clone();
            let running = self.running.clone();
            thread::spawn(move || {
                let mut decoder = Utf8Decoder::default();
                for record in Scanner::new(PtyReader(reader), scan::pass_through) {
                    match record {
                        Ok(data) => emit_output(&handlers, decoder.decode(&data)),
                        Err(e) => {
                            warn!(target: "session", "read debugger output: {e}");
                            break;
                        }
                    }
                    if !running.load(Ordering::SeqCst) {
                        return;
                    }
                }
                emit_output(&handlers, decoder.finish());
            });
        }

        Ok(())
    }

    fn command(&self) -> &str {
        &self.program
    }

    fn arguments(&self) -> &[String] {
        &self.args
    }

    fn environment(&self) -> &[String] {
        &self.env
    }

    fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    fn write(&self, data: &str) -> Result<(), Error> {
        let pty = self.lock().pty.clone().ok_or(Error::NotInitialized)?;
        let mut pty: &File = &pty;
        pty.write_all(data.as_bytes())?;
        Ok(())
    }

    fn send_signal(&self, signal: Signal) -> Result<(), Error> {
        let process = self.process.lock().unwrap_or_else(PoisonError::into_inner);
        match *process {
            Process::NotStarted => Err(Error::NotInitialized),
            Process::Alive(pid) => kill(pid, signal).map_err(Error::Signal),
            Process::Finished => Err(Error::DebuggerFinished),
        }
    }
}
