use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::signal::Severity;
use super::text_enum;

text_enum!(
    IncidentPriority {
        P1 => "p1",
        P2 => "p2",
        P3 => "p3",
        P4 => "p4",
    }
);

impl IncidentPriority {
    pub fn from_severity(severity: Severity) -> IncidentPriority {
        match severity {
            Severity::Critical => IncidentPriority::P1,
            Severity::Warning => IncidentPriority::P2,
            Severity::Info => IncidentPriority::P3,
        }
    }
}

text_enum!(
    IncidentStatus {
        Open => "open",
        Acknowledged => "acknowledged",
        Resolved => "resolved",
    }
);

text_enum!(
    SubjectType {
        Driver => "driver",
        Vehicle => "vehicle",
    }
);

text_enum!(
    LinkRole {
        Supporting => "supporting",
        Contradicting => "contradicting",
        Context => "context",
    }
);

pub const PATTERN_INCIDENT_TYPE: &str = "pattern";

/// Relevance given to every signal linked at creation time.
pub const DEFAULT_RELEVANCE: f64 = 0.8;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Incident {
    pub incident_id: Uuid,
    pub tenant_id: Uuid,
    pub incident_type: String,
    #[sqlx(try_from = "String")]
    pub priority: IncidentPriority,
    #[sqlx(try_from = "String")]
    pub status: IncidentStatus,
    #[sqlx(try_from = "String")]
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub subject_name: Option<String>,
    pub behavior: String,
    pub dedupe_key: String,
    pub title: String,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct IncidentSignal {
    pub incident_id: Uuid,
    pub signal_id: Uuid,
    #[sqlx(try_from = "String")]
    pub role: LinkRole,
    pub relevance: f64,
}
