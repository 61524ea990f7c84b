//! Responses in reply to [`crate::requests`] from the debug adapter
use crate::types;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(rename = "request_seq")]
    pub request_seq: i64,
    pub success: bool,
    pub message: Option<String>,
    #[serde(flatten)]
    pub body: Option<ResponseBody>,
}

impl Response {
    /// Convert an unsuccessful response into an error carrying the adapter message
    pub fn into_result(self) -> eyre::Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(eyre::eyre!(
                "adapter rejected request: {}",
                self.message.as_deref().unwrap_or("no message")
            ))
        }
    }
}

/// Response bodies the client reads; other commands carry no body of interest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", content = "body", rename_all = "camelCase")]
#[non_exhaustive]
pub enum ResponseBody {
    Initialize(Capabilities),
    SetBreakpoints(SetBreakpoints),
    Continue(ContinueResponse),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub supports_configuration_done_request: Option<bool>,
    pub supports_function_breakpoints: Option<bool>,
    pub supports_conditional_breakpoints: Option<bool>,
    pub supports_modules_request: Option<bool>,
    pub support_terminate_debuggee: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpoints {
    pub breakpoints: Vec<types::Breakpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueResponse {
    pub all_threads_continued: Option<bool>,
}
