use nix::errno::Errno;
use std::process::ExitStatus;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- configuration errors --------------------------------------
    #[error("Unknown {0} field")]
    UnknownField(String),
    #[error("invalid value for {name} field, expected {expected}")]
    InvalidConfigValue {
        name: String,
        expected: &'static str,
    },
    #[error("invalid relative path `{0}`: must be relative to the project root")]
    InvalidRelativePath(String),
    #[error("invalid endpoint `{0}`")]
    InvalidEndpoint(String),
    #[error("Invalid definition in XDS_OVERWRITE_COMMANDS ({0})")]
    InvalidOverwrite(String),
    #[error("Invalid log level : \"{0}\"")]
    InvalidLogLevel(String),
    #[error("{0}")]
    EnvFile(String),
    #[error("Cannot create log file {0}")]
    LogFile(String),

    // --------------------------------- connectivity errors ---------------------------------------
    #[error("Cannot connect to {url} ({reason})")]
    Connection { url: String, reason: String },
    #[error("Failed to get device ID from {0}")]
    MissingClientId(String),
    #[error("XDS server not connected (url={0})")]
    ServerNotConnected(String),
    #[error("IO.socket connection error: {0}")]
    EventChannel(String),
    #[error("event channel is not connected")]
    ChannelClosed,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{method} {path} failed with status {status}: {body}")]
    HttpStatus {
        method: &'static str,
        path: String,
        status: u16,
        body: String,
    },

    // --------------------------------- protocol errors -------------------------------------------
    #[error("cannot decode {what}: {source}")]
    Decode {
        what: &'static str,
        source: serde_json::Error,
    },
    #[error("exec request failed: {0}")]
    ExecRequest(Box<Error>),
    #[error("null CmdID")]
    MissingCmdId,
    #[error("malformed event packet `{0}`")]
    Packet(String),

    // --------------------------------- runtime session errors ------------------------------------
    #[error("exeCmd not initialized")]
    NotInitialized,
    #[error("cmdID not set")]
    CommandNotStarted,
    #[error("cannot start debugger `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("debugger process {0}")]
    DebuggerExit(ExitStatus),
    #[error("debugger process already finished")]
    DebuggerFinished,
    #[error("signal forwarding rejected: {0}")]
    Signal(Errno),
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("cannot open inferior tty {path}: {source}")]
    InferiorTty {
        path: String,
        source: std::io::Error,
    },

    // --------------------------------- exit conditions -------------------------------------------
    #[error("Abnormal loop detected on stdin")]
    StdinLoop,
    #[error("{0}")]
    Disconnected(String),
    #[error("{0}")]
    CommandFile(String),
    #[error("{0}")]
    Remote(String),
}

impl Error {
    /// Return the process exit code that reports this error to the caller of xds-gdb.
    pub fn exit_code(&self) -> i32 {
        let errno = match self {
            Error::UnknownField(_) => Errno::EINVAL,
            Error::InvalidConfigValue { .. } => Errno::EINVAL,
            Error::InvalidRelativePath(_) => Errno::EINVAL,
            Error::InvalidEndpoint(_) => Errno::EINVAL,
            Error::InvalidOverwrite(_) => Errno::EINVAL,
            Error::InvalidLogLevel(_) => Errno::EINVAL,
            Error::EnvFile(_) => Errno::ENOENT,
            Error::LogFile(_) => Errno::EPERM,

            Error::Connection { .. } => bad_executable(),
            Error::MissingClientId(_) => bad_executable(),
            Error::ServerNotConnected(_) => bad_executable(),
            Error::EventChannel(_) => Errno::ECONNABORTED,
            Error::ChannelClosed => Errno::ECONNABORTED,
            Error::Http(_) => bad_executable(),
            Error::HttpStatus { .. } => bad_executable(),

            Error::Decode { .. } => bad_executable(),
            Error::ExecRequest(_) => Errno::EAGAIN,
            Error::MissingCmdId => Errno::EBADMSG,
            Error::Packet(_) => Errno::EPROTO,

            Error::NotInitialized => Errno::ESRCH,
            Error::CommandNotStarted => Errno::ESRCH,
            Error::DebuggerFinished => Errno::ESRCH,
            Error::Spawn { .. } => bad_executable(),
            Error::DebuggerExit(_) => Errno::ESHUTDOWN,
            Error::Signal(errno) => *errno,
            Error::IO(err) => return err.raw_os_error().unwrap_or(Errno::EIO as i32),
            Error::InferiorTty { .. } => Errno::EPERM,

            Error::StdinLoop => Errno::ELOOP,
            Error::Disconnected(_) => Errno::ESHUTDOWN,
            Error::CommandFile(_) => Errno::ENOENT,
            Error::Remote(_) => Errno::EIO,
        };
        errno as i32
    }
}

/// Platform error code reported when the debugger cannot be set up or executed.
#[cfg(target_os = "linux")]
pub fn bad_executable() -> Errno {
    Errno::EBADE
}

/// Platform error code reported when the debugger cannot be set up or executed.
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn bad_executable() -> Errno {
    Errno::EBADEXEC
}

/// Platform error code reported when the debugger cannot be set up or executed.
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios")))]
pub fn bad_executable() -> Errno {
    Errno::ENOEXEC
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_for_exit_conditions() {
        assert_eq!(Error::StdinLoop.exit_code(), Errno::ELOOP as i32);
        assert_eq!(
            Error::Disconnected(String::new()).exit_code(),
            Errno::ESHUTDOWN as i32
        );
        assert_eq!(Error::MissingCmdId.exit_code(), Errno::EBADMSG as i32);
        assert_eq!(
            Error::EventChannel("refused".into()).exit_code(),
            Errno::ECONNABORTED as i32
        );
        assert_ne!(
            Error::MissingCmdId.exit_code(),
            Error::ServerNotConnected("x".into()).exit_code()
        );
        assert_ne!(
            Error::ExecRequest(Box::new(Error::ChannelClosed)).exit_code(),
            Error::MissingCmdId.exit_code()
        );
    }

    #[test]
    fn test_io_error_keeps_os_code() {
        let err = Error::IO(std::io::Error::from_raw_os_error(Errno::EPIPE as i32));
        assert_eq!(err.exit_code(), Errno::EPIPE as i32);
        let err = Error::IO(std::io::Error::other("no code"));
        assert_eq!(err.exit_code(), Errno::EIO as i32);
    }

    #[test]
    fn test_connection_message() {
        let err = Error::Connection {
            url: "http://localhost:8000".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot connect to http://localhost:8000 (connection refused)"
        );
    }
}
