//! Requests sent to the debug adapter
use serde::{Deserialize, Serialize};

use crate::types::{Seq, Source, SourceBreakpoint, ThreadId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub seq: Seq,
    pub r#type: String,
    #[serde(flatten)]
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "arguments", rename_all = "camelCase")]
pub enum RequestBody {
    Initialize(Initialize),
    Launch(Launch),
    SetBreakpoints(SetBreakpoints),
    ConfigurationDone,
    Continue(Continue),
    Next(Next),
    StepIn(StepIn),
    Disconnect(Disconnect),
}

impl RequestBody {
    /// Name of the command as it appears on the wire
    pub fn command(&self) -> &'static str {
        match self {
            RequestBody::Initialize(_) => "initialize",
            RequestBody::Launch(_) => "launch",
            RequestBody::SetBreakpoints(_) => "setBreakpoints",
            RequestBody::ConfigurationDone => "configurationDone",
            RequestBody::Continue(_) => "continue",
            RequestBody::Next(_) => "next",
            RequestBody::StepIn(_) => "stepIn",
            RequestBody::Disconnect(_) => "disconnect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PathFormat {
    Path,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Initialize {
    #[serde(rename = "adapterID")]
    pub adapter_id: String,
    pub client_name: Option<String>,
    pub lines_start_at1: bool,
    pub columns_start_at1: bool,
    pub path_format: PathFormat,
}

impl Default for Initialize {
    fn default() -> Self {
        Self {
            adapter_id: "lldb-dap".to_string(),
            client_name: Some("lldb-frontend".to_string()),
            lines_start_at1: true,
            columns_start_at1: true,
            path_format: PathFormat::Path,
        }
    }
}

/// `lldb-dap` launch arguments
///
/// `stdio` holds the redirect targets for the inferior's stdin, stdout and
/// stderr in that order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Launch {
    pub program: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stdio: Vec<Option<String>>,
    pub stop_on_entry: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpoints {
    pub source: Source,
    pub breakpoints: Vec<SourceBreakpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Continue {
    pub thread_id: ThreadId,
    pub single_thread: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Next {
    pub thread_id: ThreadId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepIn {
    pub thread_id: ThreadId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disconnect {
    pub terminate_debuggee: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_serialises_stdio_redirects() {
        let request = Request {
            seq: 3,
            r#type: "request".to_string(),
            body: RequestBody::Launch(Launch {
                program: "/bin/app".to_string(),
                args: vec!["--fast".to_string()],
                cwd: None,
                stdio: vec![
                    Some("/tmp/in".to_string()),
                    Some("/tmp/out".to_string()),
                    Some("/tmp/err".to_string()),
                ],
                stop_on_entry: false,
            }),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["command"], "launch");
        assert_eq!(value["type"], "request");
        assert_eq!(value["arguments"]["program"], "/bin/app");
        assert_eq!(value["arguments"]["stdio"][1], "/tmp/out");
        assert_eq!(value["arguments"]["stopOnEntry"], false);
        assert!(value["arguments"].get("cwd").is_none());
    }

    #[test]
    fn initialize_uses_adapter_id_spelling() {
        let value = serde_json::to_value(RequestBody::Initialize(Initialize::default())).unwrap();
        assert_eq!(value["arguments"]["adapterID"], "lldb-dap");
        assert_eq!(value["arguments"]["linesStartAt1"], true);
        assert_eq!(value["arguments"]["pathFormat"], "path");
    }

    #[test]
    fn request_round_trips_through_flattened_body() {
        let raw = r#"{"seq":7,"type":"request","command":"next","arguments":{"threadId":4}}"#;
        let request: Request = serde_json::from_str(raw).unwrap();
        assert_eq!(request.seq, 7);
        assert_eq!(request.body, RequestBody::Next(Next { thread_id: 4 }));
        assert_eq!(request.body.command(), "next");
    }
}
