//! Events emitted by the debug adapter
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::types::{BreakpointId, ThreadId};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "body", rename_all = "camelCase")]
#[non_exhaustive]
pub enum Event {
    Initialized,
    Output(OutputEventBody),
    Process(ProcessEventBody),
    Stopped(StoppedEventBody),
    Continued(ContinuedEventBody),
    Thread(ThreadEventBody),
    Exited(ExitedEventBody),
    Terminated,
    // Catch-all for unknown event types - not part of serde tag/content
    #[serde(skip)]
    Unknown,
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;

        match serde_json::from_value::<EventHelper>(value.clone()) {
            Ok(helper) => Ok(helper.into()),
            Err(_) => {
                if let Some(event_name) = value.get("event").and_then(|v| v.as_str()) {
                    tracing::debug!(event = event_name, "received unknown event, ignoring");
                }
                Ok(Event::Unknown)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "body", rename_all = "camelCase")]
enum EventHelper {
    Initialized,
    Output(OutputEventBody),
    Process(ProcessEventBody),
    Stopped(StoppedEventBody),
    Continued(ContinuedEventBody),
    Thread(ThreadEventBody),
    Exited(ExitedEventBody),
    Terminated,
}

impl From<EventHelper> for Event {
    fn from(helper: EventHelper) -> Self {
        match helper {
            EventHelper::Initialized => Event::Initialized,
            EventHelper::Output(body) => Event::Output(body),
            EventHelper::Process(body) => Event::Process(body),
            EventHelper::Stopped(body) => Event::Stopped(body),
            EventHelper::Continued(body) => Event::Continued(body),
            EventHelper::Thread(body) => Event::Thread(body),
            EventHelper::Exited(body) => Event::Exited(body),
            EventHelper::Terminated => Event::Terminated,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputEventBody {
    pub category: Option<String>,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    pub reason: String,
    pub thread_id: Option<ThreadId>,
    pub hit_breakpoint_ids: Option<Vec<BreakpointId>>,
    pub description: Option<String>,
    pub text: Option<String>,
    pub all_threads_stopped: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadEventBody {
    pub reason: String,
    pub thread_id: ThreadId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEventBody {
    pub name: String,
    pub system_process_id: Option<i64>,
    pub start_method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitedEventBody {
    pub exit_code: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuedEventBody {
    pub thread_id: ThreadId,
    pub all_threads_continued: Option<bool>,
}
