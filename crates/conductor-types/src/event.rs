//! Workflow execution events.
//!
//! The event log is the source of truth for an execution; the
//! `WorkflowExecution` row is a projection of it. Payloads are a tagged sum
//! type keyed by `eventType`, persisted as `event_type` + `event_data`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::execution::StepResult;

/// Payload of a workflow event, one variant per `eventType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "eventType",
    content = "eventData",
    rename_all_fields = "camelCase"
)]
pub enum EventData {
    #[serde(rename = "workflow.started")]
    WorkflowStarted {
        workflow_id: String,
        work_item_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
    },

    #[serde(rename = "workflow.completed")]
    WorkflowCompleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },

    #[serde(rename = "workflow.failed")]
    WorkflowFailed {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
    },

    #[serde(rename = "workflow.paused")]
    WorkflowPaused {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
    },

    #[serde(rename = "workflow.resumed")]
    WorkflowResumed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_job_id: Option<String>,
    },

    #[serde(rename = "workflow.cancelled")]
    WorkflowCancelled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// A step started or finished; carries the step result as of that moment.
    #[serde(rename = "step.executed")]
    StepExecuted { result: StepResult },

    /// A decision taken by an agent during a step (plan choice, retry, ...).
    #[serde(rename = "agent.decision")]
    AgentDecision {
        step_id: String,
        decision: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
    },
}

impl EventData {
    /// The persisted `event_type` discriminator.
    pub fn event_type(&self) -> &'static str {
        match self {
            EventData::WorkflowStarted { .. } => "workflow.started",
            EventData::WorkflowCompleted { .. } => "workflow.completed",
            EventData::WorkflowFailed { .. } => "workflow.failed",
            EventData::WorkflowPaused { .. } => "workflow.paused",
            EventData::WorkflowResumed { .. } => "workflow.resumed",
            EventData::WorkflowCancelled { .. } => "workflow.cancelled",
            EventData::StepExecuted { .. } => "step.executed",
            EventData::AgentDecision { .. } => "agent.decision",
        }
    }

    /// The payload alone, as stored in the `event_data` column.
    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        let mut tagged = serde_json::to_value(self)?;
        Ok(tagged
            .get_mut("eventData")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    /// Rebuild from the persisted `event_type` and `event_data` columns.
    pub fn from_parts(event_type: &str, payload: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({
            "eventType": event_type,
            "eventData": payload,
        }))
    }
}

/// An immutable, sequenced fact in an execution's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEvent {
    pub id: Uuid,
    pub execution_id: Uuid,
    #[serde(flatten)]
    pub data: EventData,
    pub timestamp: DateTime<Utc>,
    /// Dense per execution, starting at 0. Assigned by the store.
    pub sequence_number: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl WorkflowEvent {
    pub fn event_type(&self) -> &'static str {
        self.data.event_type()
    }
}

/// An event as reported by a caller, before the store assigns a sequence.
///
/// The id is chosen by the reporter so that re-reporting the same fact is
/// ignored by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWorkflowEvent {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub data: EventData,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<Value>,
}

impl NewWorkflowEvent {
    pub fn new(execution_id: Uuid, data: EventData) -> Self {
        Self {
            id: Uuid::now_v7(),
            execution_id,
            data,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn into_event(self, sequence_number: i64) -> WorkflowEvent {
        WorkflowEvent {
            id: self.id,
            execution_id: self.execution_id,
            data: self.data,
            timestamp: self.timestamp,
            sequence_number,
            metadata: self.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_matches_serialized_tag() {
        let data = EventData::WorkflowFailed {
            error: "boom".to_string(),
            step_id: Some("build".to_string()),
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["eventType"], data.event_type());
        assert_eq!(json["eventData"]["stepId"], "build");
    }

    #[test]
    fn test_payload_and_from_parts_roundtrip() {
        let data = EventData::WorkflowStarted {
            workflow_id: "fix-bug".to_string(),
            work_item_id: "42".to_string(),
            job_id: None,
        };
        let payload = data.payload().unwrap();
        assert_eq!(payload, json!({"workflowId": "fix-bug", "workItemId": "42"}));
        let rebuilt = EventData::from_parts("workflow.started", payload).unwrap();
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn test_from_parts_rejects_unknown_type() {
        assert!(EventData::from_parts("workflow.exploded", json!({})).is_err());
    }

    #[test]
    fn test_workflow_event_flattens_payload() {
        let exec_id = Uuid::now_v7();
        let event = NewWorkflowEvent::new(
            exec_id,
            EventData::AgentDecision {
                step_id: "plan".to_string(),
                decision: "split into two commits".to_string(),
                rationale: None,
            },
        )
        .into_event(3);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "agent.decision");
        assert_eq!(json["eventData"]["decision"], "split into two commits");
        assert_eq!(json["sequenceNumber"], 3);

        let parsed: WorkflowEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }
}
