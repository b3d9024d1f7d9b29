//! Remote event types.
//!
//! Every event carries a `uuid` used for confirmation. The payload is a tagged
//! union keyed by [`EventType`]; the dispatcher routes on the tag alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{LegalCase, SourceFile};

// ─── Event Type Tag ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    ConnectivityPong,
    CaseCreated,
    CaseStatusChanged,
    CaseUpdated,
    CaseReady,
    FileCreated,
    FileUpdated,
    FileTaskFailed,
    ExportCreated,
    ExportShared,
    ExportViewed,
}

impl EventType {
    /// All event types the agent knows how to handle.
    pub const ALL: [EventType; 11] = [
        Self::ConnectivityPong,
        Self::CaseCreated,
        Self::CaseStatusChanged,
        Self::CaseUpdated,
        Self::CaseReady,
        Self::FileCreated,
        Self::FileUpdated,
        Self::FileTaskFailed,
        Self::ExportCreated,
        Self::ExportShared,
        Self::ExportViewed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectivityPong => "connectivity-pong",
            Self::CaseCreated => "case-created",
            Self::CaseStatusChanged => "case-status-changed",
            Self::CaseUpdated => "case-updated",
            Self::CaseReady => "case-ready",
            Self::FileCreated => "file-created",
            Self::FileUpdated => "file-updated",
            Self::FileTaskFailed => "file-task-failed",
            Self::ExportCreated => "export-created",
            Self::ExportShared => "export-shared",
            Self::ExportViewed => "export-viewed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Event Payloads ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum EventPayload {
    #[serde(rename = "connectivity-pong")]
    Pong {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename = "case-created")]
    CaseCreated { legal_case: LegalCase },
    #[serde(rename = "case-status-changed")]
    CaseStatusChanged {
        #[serde(rename = "legalCaseUUID")]
        legal_case_uuid: Uuid,
        status: String,
    },
    #[serde(rename = "case-updated")]
    CaseUpdated { legal_case: LegalCase },
    #[serde(rename = "case-ready")]
    CaseReady {
        #[serde(rename = "legalCaseUUID")]
        legal_case_uuid: Uuid,
    },
    #[serde(rename = "file-created")]
    FileCreated { source_file: SourceFile },
    #[serde(rename = "file-updated")]
    FileUpdated {
        #[serde(rename = "sourceFileUUID")]
        source_file_uuid: Uuid,
        field: String,
    },
    #[serde(rename = "file-task-failed")]
    FileTaskFailed {
        #[serde(rename = "sourceFileUUID")]
        source_file_uuid: Uuid,
        #[serde(default)]
        task: Option<String>,
    },
    #[serde(rename = "export-created")]
    ExportCreated {
        #[serde(rename = "exportUUID")]
        export_uuid: Uuid,
        #[serde(rename = "legalCaseUUID")]
        legal_case_uuid: Uuid,
        recipient: String,
        file_uri: String,
    },
    #[serde(rename = "export-shared")]
    ExportShared {
        #[serde(rename = "exportUUID")]
        export_uuid: Uuid,
        method: String,
        #[serde(default)]
        link: Option<String>,
        #[serde(default)]
        email: Option<String>,
    },
    #[serde(rename = "export-viewed")]
    ExportViewed {
        #[serde(rename = "legalCaseUUID")]
        legal_case_uuid: Uuid,
        opened_by: String,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Pong { .. } => EventType::ConnectivityPong,
            Self::CaseCreated { .. } => EventType::CaseCreated,
            Self::CaseStatusChanged { .. } => EventType::CaseStatusChanged,
            Self::CaseUpdated { .. } => EventType::CaseUpdated,
            Self::CaseReady { .. } => EventType::CaseReady,
            Self::FileCreated { .. } => EventType::FileCreated,
            Self::FileUpdated { .. } => EventType::FileUpdated,
            Self::FileTaskFailed { .. } => EventType::FileTaskFailed,
            Self::ExportCreated { .. } => EventType::ExportCreated,
            Self::ExportShared { .. } => EventType::ExportShared,
            Self::ExportViewed { .. } => EventType::ExportViewed,
        }
    }
}

// ─── Remote Event ────────────────────────────────────────────────────────────

/// A single delivery from the remote event source.
///
/// The same `uuid` may arrive more than once until it is confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub uuid: Uuid,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl RemoteEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            ts: Utc::now(),
            payload,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_serde_name_matches_as_str() {
        for t in EventType::ALL {
            assert_eq!(serde_json::to_value(t).unwrap(), t.as_str());
        }
        assert!(serde_json::from_str::<EventType>("\"case-deleted\"").is_err());
    }

    #[test]
    fn test_payload_tag_matches_event_type() {
        let event = RemoteEvent::new(EventPayload::CaseReady {
            legal_case_uuid: Uuid::new_v4(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.event_type().as_str());
        assert!(value.get("uuid").is_some());
    }

    #[test]
    fn test_deserialize_export_created() {
        let json = r#"{
            "uuid": "6f1c1c57-2a8e-4d55-9d0f-0d2b8d5d3c11",
            "ts": "2024-01-01T00:00:00Z",
            "type": "export-created",
            "exportUUID": "0b7a0c1e-4a44-4f0e-9d5e-7b8e6a1d2c33",
            "legalCaseUUID": "1c2d3e4f-5a6b-4c7d-8e9f-0a1b2c3d4e5f",
            "recipient": "insurer",
            "fileUri": "https://example.invalid/exports/1.pdf"
        }"#;
        let event: RemoteEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type(), EventType::ExportCreated);
        match event.payload {
            EventPayload::ExportCreated { recipient, .. } => assert_eq!(recipient, "insurer"),
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
