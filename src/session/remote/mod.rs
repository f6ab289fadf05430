//! Session with a gdb executed by a remote XDS agent.
//!
//! The agent is driven with its REST API ([`http`]), debugger input and output go through a
//! socket.io event channel ([`channel`]).

pub mod api;
pub mod channel;
pub mod http;
pub mod inventory;
pub mod packet;

use crate::error::Error;
use crate::session::remote::api::{
    ApiConfig, ExecArgs, ExecEvent, ExecExitMsg, ExecOutMsg, ExecResult, ExecSignalArgs,
    ProjectConfig, Sdk, Version,
};
use crate::session::remote::channel::{ChannelBuilder, EventChannel};
use crate::session::remote::http::HttpClient;
use crate::session::{ConfigValue, Handlers, Init, Output, Session};
use log::{debug, error, info, warn};
use nix::sys::signal::Signal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Command executed by the agent, `GDB` is set by the SDK environment setup script.
pub const REMOTE_COMMAND: &str = "exec $GDB";
/// Agent endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "localhost:8000";
/// When set, the agent workaround for gdbserver inferior output is disabled.
pub const GDBSERVER_NOFIX_ENV: &str = "XDS_GDBSERVER_OUTPUT_NOFIX";
/// Connection retries requested when the server URL is updated.
const SERVER_CONN_RETRY: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    /// Agent is reachable, inventory is fetched.
    Connected,
    /// Discovery report produced, nothing else can be done.
    ProjectListed,
    /// Project resolved and event channel open.
    Resolved,
    /// Debugger is executed by the agent.
    Streaming,
    Closed,
}

#[derive(Debug, Clone)]
struct Settings {
    endpoint: String,
    server_url: String,
    project_id: String,
    sdk_id: String,
    relative_path: String,
    list_projects: bool,
    gdbserver_output_fix: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            server_url: String::new(),
            project_id: String::new(),
            sdk_id: String::new(),
            relative_path: String::new(),
            list_projects: false,
            gdbserver_output_fix: std::env::var_os(GDBSERVER_NOFIX_ENV).is_none(),
        }
    }
}

struct Inner {
    state: State,
    settings: Settings,
    http: Option<HttpClient>,
    channel: Option<EventChannel>,
    project: Option<ProjectConfig>,
    cmd_id: String,
}

pub struct RemoteSession {
    args: Vec<String>,
    env: Vec<String>,
    handlers: Arc<Handlers>,
    inner: Mutex<Inner>,
}

impl RemoteSession {
    /// Create new session, nothing is connected until [`Session::init`].
    ///
    /// # Arguments
    ///
    /// * `args`: gdb arguments
    /// * `env`: environment assignments (`NAME=value`) passed to the remote command
    pub fn new(args: Vec<String>, env: Vec<String>) -> Self {
        Self {
            args,
            env,
            handlers: Arc::new(Handlers::default()),
            inner: Mutex::new(Inner {
                state: State::Created,
                settings: Settings::default(),
                http: None,
                channel: None,
                project: None,
                cmd_id: String::new(),
            }),
        }
    }

    pub fn state(&self) -> State {
        self.lock().state
    }

    /// Return command ID given by the agent once the debugger is started.
    pub fn command_id(&self) -> Option<String> {
        let inner = self.lock();
        (!inner.cmd_id.is_empty()).then(|| inner.cmd_id.clone())
    }

    /// Return relative path used for the remote command, may be derived during init.
    pub fn relative_path(&self) -> String {
        self.lock().settings.relative_path.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Update the XDS server URL known by the agent if needed.
    fn reconcile_server(http: &HttpClient, server_url: &str) -> Result<(), Error> {
        let mut config = match http.get::<ApiConfig>("/config") {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(target: "remote", "cannot get agent configuration: {e}");
                return Ok(());
            }
        };
        let Some(server) = config.servers.first_mut() else {
            warn!(target: "remote", "no XDS server in agent configuration");
            return Ok(());
        };

        if !server_url.is_empty() && (server.url != server_url || !server.connected) {
            info!(target: "remote", "update XDS server url: {} -> {server_url}", server.url);
            server.url = server_url.to_string();
            server.conn_retry = SERVER_CONN_RETRY;
            if let Err(e) = http.post_raw("/config", &config) {
                warn!(target: "remote", "cannot update agent configuration: {e}");
            }
        } else if !server.connected {
            return Err(Error::ServerNotConnected(server.url.clone()));
        }
        Ok(())
    }

    fn open_channel(&self, http: &HttpClient) -> Result<EventChannel, Error> {
        fn decode<T: DeserializeOwned + Default>(event: ExecEvent, payload: Value) -> T {
            serde_json::from_value(payload).unwrap_or_else(|e| {
                warn!(target: "remote", "malformed {event} event: {e}");
                T::default()
            })
        }

        let on_error = self.handlers.clone();
        let on_disconnect = self.handlers.clone();
        let on_output = self.handlers.clone();
        let on_inferior = self.handlers.clone();
        let on_exit = self.handlers.clone();

        ChannelBuilder::new()
            .on(channel::ERROR_EVENT, move |payload| {
                on_error.error(&Error::Remote(value_message(payload)))
            })
            .on(channel::DISCONNECTION_EVENT, move |payload| {
                on_disconnect.disconnect(Some(&Error::Disconnected(value_message(payload))))
            })
            .on(ExecEvent::Output.to_string(), move |payload| {
                let msg: ExecOutMsg = decode(ExecEvent::Output, payload);
                on_output.output(&msg.into());
            })
            .on(ExecEvent::InferiorOutput.to_string(), move |payload| {
                let msg: ExecOutMsg = decode(ExecEvent::InferiorOutput, payload);
                on_inferior.inferior_output(&msg.into());
            })
            .on(ExecEvent::Exit.to_string(), move |payload| {
                let msg: ExecExitMsg = decode(ExecEvent::Exit, payload);
                let err = msg.error_message().map(Error::Remote);
                debug!(target: "remote", "remote command exited with code {}", msg.code);
                on_exit.exit(msg.code, err.as_ref());
            })
            .connect(http.base_url(), http.client_id())
            .map_err(|e| match e {
                Error::EventChannel(_) => e,
                other => Error::EventChannel(other.to_string()),
            })
    }
}

impl From<ExecOutMsg> for Output {
    fn from(msg: ExecOutMsg) -> Self {
        Output {
            timestamp: msg.timestamp,
            stdout: msg.stdout,
            stderr: msg.stderr,
        }
    }
}

fn value_message(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Decode an inventory list, a malformed answer is an empty inventory.
fn decode_list<T: DeserializeOwned>(what: &str, data: &[u8]) -> Vec<T> {
    serde_json::from_slice(data).unwrap_or_else(|e| {
        error!(target: "remote", "cannot decode {what}: {e}");
        vec![]
    })
}

impl Session for RemoteSession {
    fn init(&self) -> Result<Init, Error> {
        let mut inner = self.lock();
        inner.cmd_id.clear();
        let settings = inner.settings.clone();

        let base_url = http::normalize_endpoint(&settings.endpoint)?;
        info!(target: "remote", "connect HTTP client on {base_url}");
        let http = HttpClient::connect(&base_url)?;
        info!(target: "remote", "HTTP session ID: {}", http.client_id());

        let version: Version = http.get("/version")?;
        info!(
            target: "remote",
            "XDS agent version: {} (api {})", version.client.version, version.client.api_version
        );

        Self::reconcile_server(&http, &settings.server_url)?;

        let data = http.get_raw("/projects")?;
        let projects: Vec<ProjectConfig> = decode_list("projects", &data);
        inner.state = State::Connected;

        if settings.project_id.is_empty() || settings.list_projects {
            let data = http.get_raw("/servers/0/sdks")?;
            let sdks: Vec<Sdk> = decode_list("sdks", &data);
            inner.http = Some(http);
            inner.state = State::ProjectListed;
            return Ok(Init::Report(inventory::discovery_report(
                &projects,
                &sdks,
                env!("CARGO_PKG_NAME"),
            )));
        }

        let project = inventory::resolve_project(&projects, &settings.project_id).cloned();
        match project.as_ref() {
            Some(p) => debug!(target: "remote", "project `{}` resolved to {}", settings.project_id, p.id),
            None => warn!(target: "remote", "unknown project `{}`", settings.project_id),
        }

        if settings.relative_path.is_empty() {
            if let (Some(p), Ok(cwd)) = (project.as_ref(), std::env::current_dir()) {
                let cwd = cwd.to_string_lossy();
                debug!(target: "remote", "try to derive relative path: cwd={cwd}, client path={}", p.path);
                if let Some(rpath) = inventory::derive_relative_path(&cwd, &p.path) {
                    debug!(target: "remote", "relative path set to `{rpath}`");
                    inner.settings.relative_path = rpath;
                }
            }
        }

        info!(target: "remote", "connect event channel on {base_url}");
        let channel = self.open_channel(&http)?;

        inner.http = Some(http);
        inner.channel = Some(channel);
        inner.project = project;
        inner.state = State::Resolved;
        Ok(Init::Ready)
    }

    fn close(&self) -> Result<(), Error> {
        self.handlers.clear();
        let mut inner = self.lock();
        inner.cmd_id.clear();
        inner.state = State::Closed;
        Ok(())
    }

    fn set_config(&self, name: &str, value: ConfigValue) -> Result<(), Error> {
        let mut inner = self.lock();
        let settings = &mut inner.settings;
        match name {
            "endpoint" => settings.endpoint = value.into_string(name)?,
            "serverURL" => settings.server_url = value.into_string(name)?,
            "projectID" => settings.project_id = value.into_string(name)?,
            "sdkID" => settings.sdk_id = value.into_string(name)?,
            "relativePath" => {
                let path = value.into_string(name)?;
                if Path::new(&path).is_absolute() {
                    return Err(Error::InvalidRelativePath(path));
                }
                settings.relative_path = path;
            }
            "listProjects" => settings.list_projects = value.into_bool(name)?,
            "gdbserverOutputFix" => settings.gdbserver_output_fix = value.into_bool(name)?,
            _ => return Err(Error::UnknownField(name.to_string())),
        }
        Ok(())
    }

    fn start(&self, inferior_tty: bool) -> Result<(), Error> {
        let mut inner = self.lock();
        if inner.state != State::Resolved {
            return Err(Error::NotInitialized);
        }
        let http = inner.http.as_ref().ok_or(Error::NotInitialized)?;

        let settings = &inner.settings;
        let project = inner.project.as_ref();
        let sdk_id = match (settings.sdk_id.is_empty(), project) {
            (true, Some(p)) => p.default_sdk.clone(),
            _ => settings.sdk_id.clone(),
        };
        let args = ExecArgs {
            id: project
                .map(|p| p.id.clone())
                .unwrap_or_else(|| settings.project_id.clone()),
            sdk_id,
            cmd: REMOTE_COMMAND.to_string(),
            args: self.args.clone(),
            env: self.env.clone(),
            rpath: settings.relative_path.clone(),
            tty: inferior_tty,
            tty_gdbserver_fix: settings.gdbserver_output_fix,
            timeout: -1,
        };

        info!(target: "remote", "POST /exec {args:?}");
        let res: ExecResult = http
            .post("/exec", &args)
            .map_err(|e| Error::ExecRequest(Box::new(e)))?;
        if res.cmd_id.is_empty() {
            return Err(Error::MissingCmdId);
        }
        debug!(target: "remote", "remote command started, cmdID={}", res.cmd_id);

        inner.cmd_id = res.cmd_id;
        inner.state = State::Streaming;
        Ok(())
    }

    fn command(&self) -> &str {
        REMOTE_COMMAND
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
        let inner = self.lock();
        let channel = inner.channel.as_ref().ok_or(Error::NotInitialized)?;
        let event: &'static str = ExecEvent::Input.into();
        channel.emit(event, Value::from(data))
    }

    fn send_signal(&self, signal: Signal) -> Result<(), Error> {
        let inner = self.lock();
        if inner.cmd_id.is_empty() {
            return Err(Error::CommandNotStarted);
        }
        let http = inner.http.as_ref().ok_or(Error::NotInitialized)?;
        let args = ExecSignalArgs {
            cmd_id: inner.cmd_id.clone(),
            signal: signal.as_str().to_string(),
        };
        debug!(target: "remote", "POST /signal {args:?}");
        http.post_raw("/signal", &args)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_set_config() {
        let session = RemoteSession::new(vec![], vec![]);
        session.set_config("endpoint", "8000".into()).unwrap();
        session.set_config("projectID", "abc".into()).unwrap();
        session.set_config("relativePath", "src/app".into()).unwrap();
        session.set_config("listProjects", true.into()).unwrap();
        assert_eq!(session.relative_path(), "src/app");

        assert!(matches!(
            session.set_config("relativePath", "/abs/path".into()),
            Err(Error::InvalidRelativePath(_))
        ));
        assert!(matches!(
            session.set_config("listProjects", "yes".into()),
            Err(Error::InvalidConfigValue { .. })
        ));
        assert!(matches!(
            session.set_config("rPath", "src".into()),
            Err(Error::UnknownField(_))
        ));
    }

    #[test]
    fn test_actions_before_start() {
        let session = RemoteSession::new(vec!["-x".to_string(), "gdb.ini".to_string()], vec![]);
        assert_eq!(session.command(), REMOTE_COMMAND);
        assert_eq!(session.arguments(), ["-x", "gdb.ini"]);
        assert!(matches!(
            session.send_signal(Signal::SIGINT),
            Err(Error::CommandNotStarted)
        ));
        assert!(matches!(session.write("bt\n"), Err(Error::NotInitialized)));
        assert!(matches!(session.start(false), Err(Error::NotInitialized)));
        assert!(session.command_id().is_none());
    }

    #[test]
    fn test_invalid_endpoint() {
        let session = RemoteSession::new(vec![], vec![]);
        session.set_config("endpoint", "".into()).unwrap();
        assert!(matches!(session.init(), Err(Error::InvalidEndpoint(_))));
    }

    #[test]
    fn test_close_clears_handlers() {
        let session = RemoteSession::new(vec![], vec![]);
        session.on_output(Box::new(|_| {}));
        session.on_exit(Box::new(|_, _| {}));
        session.close().unwrap();
        assert!(session.handlers().is_empty());
        assert_eq!(session.state(), State::Closed);
    }
}
