//! CI event records and the batch envelope sent to the collector
//!
//! The wire body is a single JSON object:
//!
//! ```text
//! { "server": { "type": ..., "url": ..., ... }, "events": [ { "eventType": ..., ... }, ... ] }
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::server::ServerInfo;

/// Kind of CI occurrence an event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiEventType {
    Queued,
    Started,
    Finished,
    Scm,
    Removed,
    DeleteRequested,
}

impl CiEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CiEventType::Queued => "queued",
            CiEventType::Started => "started",
            CiEventType::Finished => "finished",
            CiEventType::Scm => "scm",
            CiEventType::Removed => "removed",
            CiEventType::DeleteRequested => "delete_requested",
        }
    }
}

impl fmt::Display for CiEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a finished build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildResult {
    Success,
    Failure,
    Unstable,
    Aborted,
    Unavailable,
}

/// One CI occurrence to report
///
/// Events are immutable once published. The delivery worker only reads
/// `project`, `build_ci_id` and `event_type` (for its log summary); the rest
/// is carried through to the wire as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiEvent {
    pub event_type: CiEventType,
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_display_name: Option<String>,
    pub build_ci_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    /// Build start, epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<BuildResult>,
}

impl CiEvent {
    /// Create an event with only the identifying fields set
    pub fn new(
        event_type: CiEventType,
        project: impl Into<String>,
        build_ci_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            project: project.into(),
            project_display_name: None,
            build_ci_id: build_ci_id.into(),
            number: None,
            start_time: None,
            estimated_duration: None,
            duration: None,
            result: None,
        }
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.number = Some(number.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.project_display_name = Some(name.into());
        self
    }

    pub fn with_start_time(mut self, start_time: i64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_estimated_duration(mut self, millis: i64) -> Self {
        self.estimated_duration = Some(millis);
        self
    }

    /// Mark the event as the end of a build
    pub fn with_result(mut self, result: BuildResult, duration: i64) -> Self {
        self.result = Some(result);
        self.duration = Some(duration);
        self
    }

    /// Short `<project>:<build-id>:<event-type>` form used in delivery logs
    pub fn summary(&self) -> String {
        format!("{}:{}:{}", self.project, self.build_ci_id, self.event_type)
    }
}

/// Snapshot of pending events plus the identity of the reporting server
#[derive(Debug, Clone, Serialize)]
pub struct EventsBatch {
    pub server: ServerInfo,
    pub events: Vec<Arc<CiEvent>>,
}

impl EventsBatch {
    pub fn new(server: ServerInfo, events: Vec<Arc<CiEvent>>) -> Self {
        Self { server, events }
    }

    /// Encode the batch into the collector's wire body
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Comma-separated summaries of every event in the batch
    pub fn summary(&self) -> String {
        self.events
            .iter()
            .map(|event| event.summary())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ServerInfo {
        ServerInfo {
            server_type: "jenkins".to_string(),
            version: "2.401".to_string(),
            url: "http://ci.local:8080".to_string(),
            instance_id: "ci-1".to_string(),
            sending_time: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_event_summary() {
        let event = CiEvent::new(CiEventType::Started, "core-build", "41");
        assert_eq!(event.summary(), "core-build:41:started");
    }

    #[test]
    fn test_batch_summary_joins_events() {
        let batch = EventsBatch::new(
            server(),
            vec![
                Arc::new(CiEvent::new(CiEventType::Started, "a", "1")),
                Arc::new(CiEvent::new(CiEventType::Finished, "b", "2")),
            ],
        );
        assert_eq!(batch.summary(), "a:1:started, b:2:finished");
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_batch_json_shape() {
        let event = CiEvent::new(CiEventType::Finished, "core-build", "41")
            .with_number("41")
            .with_result(BuildResult::Success, 1200);
        let batch = EventsBatch::new(server(), vec![Arc::new(event)]);

        let json: serde_json::Value = serde_json::from_str(&batch.to_json().unwrap()).unwrap();

        assert_eq!(json["server"]["type"], "jenkins");
        assert_eq!(json["server"]["instanceId"], "ci-1");
        assert_eq!(json["server"]["sendingTime"], 1_700_000_000_000i64);
        let events = json["events"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["eventType"], "finished");
        assert_eq!(events[0]["buildCiId"], "41");
        assert_eq!(events[0]["result"], "success");
        assert_eq!(events[0]["duration"], 1200);
        // Unset optional fields are omitted
        assert!(events[0].get("startTime").is_none());
    }

    #[test]
    fn test_started_event_carries_build_timing() {
        let event = CiEvent::new(CiEventType::Started, "core-build", "42")
            .with_display_name("Core Build")
            .with_start_time(1_700_000_000_000)
            .with_estimated_duration(90_000);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["projectDisplayName"], "Core Build");
        assert_eq!(json["startTime"], 1_700_000_000_000i64);
        assert_eq!(json["estimatedDuration"], 90_000);
        assert!(json.get("result").is_none());
        assert!(json.get("duration").is_none());
    }

    #[test]
    fn test_event_parses_from_json() {
        let json = r#"{"eventType":"queued","project":"nightly","buildCiId":"7"}"#;
        let event: CiEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, CiEvent::new(CiEventType::Queued, "nightly", "7"));
    }
}
