//! Payloads of the XDS agent REST API (v1) and of its websocket events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{Display, EnumString, IntoStaticStr};

/// Prefix of every REST route.
pub const API_PREFIX: &str = "/api/v1";
/// Header carrying the session credential (client ID).
pub const SID_HEADER: &str = "Xds-Agent-Sid";

/// Events exchanged over the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
pub enum ExecEvent {
    #[strum(serialize = "exec:input")]
    Input,
    #[strum(serialize = "exec:output")]
    Output,
    #[strum(serialize = "exec:inferior-output")]
    InferiorOutput,
    #[strum(serialize = "exec:exit")]
    Exit,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentVersion {
    pub id: String,
    pub version: String,
    pub api_version: String,
    pub git_tag: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Version {
    pub client: AgentVersion,
    pub servers: Vec<AgentVersion>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub id: String,
    pub url: String,
    pub conn_retry: i32,
    pub connected: bool,
    pub disabled: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Agent configuration, unknown fields are kept as is so that the configuration may be posted
/// back unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub servers: Vec<ServerConfig>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectConfig {
    pub id: String,
    pub label: String,
    /// Project path on the client side.
    pub path: String,
    pub default_sdk: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Sdk {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecArgs {
    pub id: String,
    #[serde(rename = "sdkID")]
    pub sdk_id: String,
    pub cmd: String,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub rpath: String,
    pub tty: bool,
    pub tty_gdbserver_fix: bool,
    /// Command timeout in seconds, negative value means no timeout.
    pub timeout: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExecResult {
    pub status: String,
    #[serde(rename = "cmdID")]
    pub cmd_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecSignalArgs {
    #[serde(rename = "cmdID")]
    pub cmd_id: String,
    pub signal: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExecOutMsg {
    #[serde(rename = "cmdID")]
    pub cmd_id: String,
    pub timestamp: String,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExecExitMsg {
    #[serde(rename = "cmdID")]
    pub cmd_id: String,
    pub timestamp: String,
    pub code: i32,
    /// Error serialized by the agent: a string, an object (Go errors are serialized as `{}`) or
    /// null.
    pub error: Value,
}

impl ExecExitMsg {
    /// Return error message reported by the agent if any.
    pub fn error_message(&self) -> Option<String> {
        match &self.error {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Object(o) if o.is_empty() => {
                Some(format!("command exited with code {}", self.code))
            }
            other => Some(other.to_string()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_event_names() {
        assert_eq!(ExecEvent::Output.to_string(), "exec:output");
        let name: &'static str = ExecEvent::InferiorOutput.into();
        assert_eq!(name, "exec:inferior-output");
        assert_eq!(ExecEvent::from_str("exec:exit").unwrap(), ExecEvent::Exit);
        assert!(ExecEvent::from_str("exec:unknown").is_err());
    }

    #[test]
    fn test_exec_args_wire_names() {
        let args = ExecArgs {
            id: "IW7B4EE-DBY4Z74_myProject".to_string(),
            sdk_id: "poky-agl_aarch64".to_string(),
            cmd: "exec $GDB".to_string(),
            args: vec!["-x".to_string(), "gdb.ini".to_string()],
            env: vec![],
            rpath: "src".to_string(),
            tty: false,
            tty_gdbserver_fix: true,
            timeout: -1,
        };
        let value = serde_json::to_value(&args).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "IW7B4EE-DBY4Z74_myProject",
                "sdkID": "poky-agl_aarch64",
                "cmd": "exec $GDB",
                "args": ["-x", "gdb.ini"],
                "env": [],
                "rpath": "src",
                "tty": false,
                "ttyGdbserverFix": true,
                "timeout": -1,
            })
        );
    }

    #[test]
    fn test_config_keeps_unknown_fields() {
        let raw = json!({
            "website": "www",
            "servers": [{"id": "0", "url": "http://srv:8000", "connected": false, "apiUrl": "x"}],
        });
        let cfg: ApiConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(cfg.servers[0].url, "http://srv:8000");
        let back = serde_json::to_value(&cfg).unwrap();
        assert_eq!(back["website"], "www");
        assert_eq!(back["servers"][0]["apiUrl"], "x");
    }

    #[test]
    fn test_exit_error_message() {
        let msg: ExecExitMsg = serde_json::from_value(json!({"code": 0, "error": null})).unwrap();
        assert_eq!(msg.error_message(), None);
        let msg: ExecExitMsg = serde_json::from_value(json!({"code": 2, "error": {}})).unwrap();
        assert_eq!(
            msg.error_message().unwrap(),
            "command exited with code 2"
        );
        let msg: ExecExitMsg =
            serde_json::from_value(json!({"code": 1, "error": "killed"})).unwrap();
        assert_eq!(msg.error_message().unwrap(), "killed");
    }
}
