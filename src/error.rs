use serde_json::Value;

pub type ScheduleResult<T> = Result<T, ScheduleError>;

/// Failures reported by the scheduling collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("a schedule with this name already exists: {message}")]
    DuplicateName { message: String },

    #[error("publish blocked by {conflict_count} critical conflict(s): {message}")]
    PublishBlocked {
        message: String,
        conflict_count: usize,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("network failure: {0}")]
    Transport(String),

    #[error("unexpected response shape: {0}")]
    Decode(String),

    #[error("fixture error: {0}")]
    Fixture(String),
}

impl ScheduleError {
    /// Machine-distinguishable kind, used as the IPC error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateName { .. } => "duplicate_name",
            Self::PublishBlocked { .. } => "publish_blocked",
            Self::NotFound(_) => "not_found",
            Self::Server { .. } => "server_error",
            Self::Transport(_) => "transport_failed",
            Self::Decode(_) => "bad_response",
            Self::Fixture(_) => "fixture_failed",
        }
    }

    /// Short title for the operator; the Display impl carries the detail.
    pub fn title(&self) -> &'static str {
        match self {
            Self::DuplicateName { .. } => "Schedule name already in use",
            Self::PublishBlocked { .. } => "Schedule has critical conflicts",
            Self::NotFound(_) => "Schedule not found",
            Self::Server { .. } => "Scheduling service error",
            Self::Transport(_) => "Scheduling service unreachable",
            Self::Decode(_) => "Unexpected response from scheduling service",
            Self::Fixture(_) => "Fixture backend error",
        }
    }
}

impl From<reqwest::Error> for ScheduleError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ScheduleError::Decode(e.to_string())
        } else {
            ScheduleError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ScheduleError {
    fn from(e: serde_json::Error) -> Self {
        ScheduleError::Decode(e.to_string())
    }
}

const DUPLICATE_NAME_CODES: &[&str] = &["duplicate_schedule_name", "duplicate_name"];

// Free-text markers the collaborator currently uses for naming collisions.
// Only consulted when the body carries no structured code.
const DUPLICATE_NAME_MARKERS: &[&str] = &[
    "يوجد بالفعل جدول باسم",
    "already exists",
    "duplicate schedule name",
];

fn detail_message(body: &Value) -> String {
    let detail = body.get("detail").unwrap_or(body);
    if let Some(s) = detail.as_str() {
        return s.to_string();
    }
    for key in ["message", "error", "detail"] {
        if let Some(s) = detail.get(key).and_then(|v| v.as_str()) {
            return s.to_string();
        }
    }
    detail.to_string()
}

fn structured_code(body: &Value) -> Option<&str> {
    body.get("code")
        .or_else(|| body.get("detail").and_then(|d| d.get("code")))
        .and_then(|v| v.as_str())
}

/// Classifies a non-success response from the collaborator.
pub fn classify_failure(status: u16, body: &Value) -> ScheduleError {
    let message = detail_message(body);

    if let Some(code) = structured_code(body) {
        if DUPLICATE_NAME_CODES.contains(&code) {
            return ScheduleError::DuplicateName { message };
        }
    } else {
        let lowered = message.to_lowercase();
        if DUPLICATE_NAME_MARKERS
            .iter()
            .any(|m| lowered.contains(&m.to_lowercase()))
        {
            return ScheduleError::DuplicateName { message };
        }
    }

    if status == 404 {
        return ScheduleError::NotFound(message);
    }

    let blocking = body
        .get("detail")
        .and_then(|d| d.get("conflicts"))
        .and_then(|c| c.as_array());
    if let Some(conflicts) = blocking {
        return ScheduleError::PublishBlocked {
            message,
            conflict_count: conflicts.len(),
        };
    }

    ScheduleError::Server { status, message }
}
