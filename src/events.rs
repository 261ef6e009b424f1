use serde::Serialize;
use serde_json::Value;

pub const STUDENT_UPDATED: &str = "studentUpdated";
pub const ENROLLMENT_STATUS_UPDATED: &str = "enrollment-status-updated";
pub const CLEARANCE_UPDATED: &str = "clearanceUpdated";
pub const NEW_NOTIFICATION: &str = "new-notification";
pub const NEW_ENROLLMENT: &str = "newEnrollment";

/// Room an event is delivered to. `user_id: None` addresses every user of the type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub user_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Target {
    pub fn student(student_id: &str) -> Self {
        Target {
            user_type: "student".to_string(),
            user_id: Some(student_id.to_string()),
        }
    }

    pub fn admins() -> Self {
        Target {
            user_type: "admin".to_string(),
            user_id: None,
        }
    }

    pub fn user(user_type: &str, user_id: &str) -> Self {
        Target {
            user_type: user_type.to_string(),
            user_id: Some(user_id.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event: &'static str,
    pub target: Option<Target>,
    pub payload: Value,
}

/// Events raised while handling one request, flushed ahead of its response.
#[derive(Debug, Default)]
pub struct EventQueue {
    pending: Vec<Event>,
}

impl EventQueue {
    pub fn emit(&mut self, event: &'static str, target: Option<Target>, payload: Value) {
        tracing::debug!(event, ?target, "queued push event");
        self.pending.push(Event {
            event,
            target,
            payload,
        });
    }

    pub fn drain(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending)
    }

    /// Drops events of a request that ended in an error.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
