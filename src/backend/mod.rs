mod fixture;
mod http;

pub use fixture::FixtureTransport;
pub use http::HttpTransport;

use crate::error::{ScheduleError, ScheduleResult};
use crate::model::{AcademicContext, ClassTarget, GenerationRequest, SessionType};
use crate::shape;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// One call against the scheduling collaborator.
#[derive(Debug, Clone)]
pub struct ApiCall {
    /// Stable operation name (`generate`, `save_preview`, ...).
    pub op: &'static str,
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiCall {
    fn get(op: &'static str, path: impl Into<String>) -> Self {
        Self {
            op,
            method: Method::Get,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    fn post(op: &'static str, path: impl Into<String>, body: Value) -> Self {
        Self {
            op,
            method: Method::Post,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }
}

/// Moves an `ApiCall` to the collaborator and returns the decoded success body.
/// Non-success responses come back as `ScheduleError` via `classify_failure`.
pub trait Transport: Send + Sync {
    fn send(&self, call: &ApiCall) -> ScheduleResult<Value>;
    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct GenerateResponse {
    #[serde(default)]
    pub schedule_id: i64,
    #[serde(default)]
    pub generation_status: String,
    #[serde(default)]
    pub total_assignments_created: i64,
    #[serde(default)]
    pub conflicts_detected: i64,
    #[serde(default)]
    pub warnings: Vec<Value>,
    #[serde(default)]
    pub preview_data: Option<Vec<Value>>,
    #[serde(default)]
    pub summary: Value,
}

impl GenerateResponse {
    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(shape::message_text).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct MissingSubject {
    #[serde(default)]
    pub class_id: i64,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub issue: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct MissingTeacherAssignment {
    #[serde(default)]
    pub class_id: i64,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub subject_id: i64,
    #[serde(default)]
    pub subject_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct DiagnosticIssues {
    #[serde(default)]
    pub missing_subjects: Vec<MissingSubject>,
    #[serde(default)]
    pub missing_teacher_assignments: Vec<MissingTeacherAssignment>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct Diagnostics {
    #[serde(default)]
    pub is_ready_for_generation: bool,
    #[serde(default)]
    pub issues: DiagnosticIssues,
    #[serde(default, deserialize_with = "skip_null_strings")]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub summary: Value,
}

fn skip_null_strings<'de, D>(d: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Vec<Option<String>> = Vec::deserialize(d)?;
    Ok(raw.into_iter().flatten().collect())
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct ValidationReport {
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub can_proceed: bool,
    #[serde(default)]
    pub errors: Vec<Value>,
    #[serde(default)]
    pub warnings: Vec<Value>,
    #[serde(default)]
    pub missing_items: Vec<Value>,
    #[serde(default)]
    pub suggestions: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavePreviewResponse {
    pub schedule_id: Option<i64>,
    pub data: Value,
}

/// Typed client for the scheduling collaborator.
#[derive(Clone)]
pub struct SchedulingApi {
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for SchedulingApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulingApi")
            .field("transport", &self.transport.describe())
            .finish()
    }
}

fn decode<T: for<'de> Deserialize<'de>>(op: &str, v: Value) -> ScheduleResult<T> {
    serde_json::from_value(v).map_err(|e| ScheduleError::Decode(format!("{op}: {e}")))
}

fn decode_list(op: &str, v: Value) -> ScheduleResult<Vec<Value>> {
    match v {
        Value::Array(items) => Ok(items),
        Value::Object(ref obj) => {
            for key in ["items", "data", "results"] {
                if let Some(Value::Array(items)) = obj.get(key) {
                    return Ok(items.clone());
                }
            }
            Err(ScheduleError::Decode(format!("{op}: expected a list")))
        }
        Value::Null => Ok(Vec::new()),
        _ => Err(ScheduleError::Decode(format!("{op}: expected a list"))),
    }
}

impl SchedulingApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn describe(&self) -> String {
        self.transport.describe()
    }

    pub fn generate(&self, request: &GenerationRequest) -> ScheduleResult<GenerateResponse> {
        let body = serde_json::to_value(request)?;
        let v = self
            .transport
            .send(&ApiCall::post("generate", "schedules/generate", body))?;
        decode("generate", v)
    }

    pub fn diagnostics(
        &self,
        academic_year_id: i64,
        session_type: SessionType,
    ) -> ScheduleResult<Diagnostics> {
        let call = ApiCall::get("diagnostics", "schedules/diagnostics")
            .with_query("academic_year_id", academic_year_id)
            .with_query("session_type", session_type.as_str());
        decode("diagnostics", self.transport.send(&call)?)
    }

    pub fn validate(
        &self,
        context: AcademicContext,
        target: &ClassTarget,
    ) -> ScheduleResult<ValidationReport> {
        let mut call = ApiCall::post("validate", "schedules/validate", json!({}))
            .with_query("academic_year_id", context.academic_year_id)
            .with_query("class_id", target.class_id)
            .with_query("session_type", context.session_type.as_str());
        if let Some(section) = target.section.as_deref() {
            call = call.with_query("section", section);
        }
        decode("validate", self.transport.send(&call)?)
    }

    pub fn save_preview(
        &self,
        request: &GenerationRequest,
        preview_data: Vec<Value>,
    ) -> ScheduleResult<SavePreviewResponse> {
        let body = json!({
            "request": serde_json::to_value(request)?,
            "preview_data": preview_data,
        });
        let v = self
            .transport
            .send(&ApiCall::post("save_preview", "schedules/save-preview", body))?;

        let status = shape::first_str(&v, &["generation_status", "data.generation_status"]);
        let success = shape::first_bool(&v, &["success"])
            .unwrap_or_else(|| status.as_deref() != Some("failed"));
        if !success {
            let message = v
                .get("warnings")
                .and_then(|w| w.as_array())
                .map(|w| w.iter().map(shape::message_text).collect::<Vec<_>>().join("; "))
                .filter(|s| !s.is_empty())
                .or_else(|| shape::first_str(&v, &["message", "detail", "summary.error"]))
                .unwrap_or_else(|| "save-preview rejected".to_string());
            return Err(crate::error::classify_failure(
                422,
                &json!({ "detail": message }),
            ));
        }
        let schedule_id = shape::first_i64(
            &v,
            &["data.schedule_id", "data.id", "schedule_id", "id"],
        )
        .filter(|id| *id > 0);
        Ok(SavePreviewResponse {
            schedule_id,
            data: v.get("data").cloned().unwrap_or(v),
        })
    }

    pub fn conflicts(&self, schedule_id: i64) -> ScheduleResult<Value> {
        self.transport.send(&ApiCall::get(
            "conflicts",
            format!("schedules/{schedule_id}/conflicts"),
        ))
    }

    pub fn save_as_draft(&self, schedule_id: i64) -> ScheduleResult<Value> {
        self.transport.send(&ApiCall::post(
            "save_as_draft",
            format!("schedules/{schedule_id}/save-as-draft"),
            json!({}),
        ))
    }

    pub fn publish(&self, schedule_id: i64) -> ScheduleResult<Value> {
        self.transport.send(&ApiCall::post(
            "publish",
            format!("schedules/{schedule_id}/publish"),
            json!({}),
        ))
    }

    /// Committed entries for one class/section, straight from the source of truth.
    pub fn class_schedule(
        &self,
        context: AcademicContext,
        target: &ClassTarget,
    ) -> ScheduleResult<Vec<Value>> {
        let mut call = ApiCall::get("class_schedule", "schedules/")
            .with_query("academic_year_id", context.academic_year_id)
            .with_query("session_type", context.session_type.as_str())
            .with_query("class_id", target.class_id);
        if let Some(section) = target.section.as_deref() {
            call = call.with_query("section", section);
        }
        decode_list("class_schedule", self.transport.send(&call)?)
    }

    pub fn subjects(&self) -> ScheduleResult<Vec<Value>> {
        let v = self
            .transport
            .send(&ApiCall::get("subjects", "academic/subjects"))?;
        decode_list("subjects", v)
    }

    pub fn teachers(&self) -> ScheduleResult<Vec<Value>> {
        let v = self.transport.send(&ApiCall::get("teachers", "teachers/"))?;
        decode_list("teachers", v)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedTransport;
    use super::*;

    #[test]
    fn save_preview_reads_original_response_shape() {
        let transport = Arc::new(ScriptedTransport::default().with(
            "save_preview",
            Ok(json!({ "schedule_id": 41, "generation_status": "saved", "warnings": [] })),
        ));
        let api = SchedulingApi::new(transport);
        let req: GenerationRequest = serde_json::from_value(json!({
            "academic_year_id": 1, "session_type": "morning", "class_id": 2, "section": "1",
            "name": "n", "session_start_time": "08:00", "period_duration": 45,
            "periods_per_day": 6, "break_duration": 15, "working_days": [1,2,3,4,5],
            "auto_assign_teachers": true, "avoid_teacher_conflicts": true,
            "balance_teacher_load": true, "prefer_subject_continuity": false
        }))
        .expect("request");
        let saved = api.save_preview(&req, Vec::new()).expect("saved");
        assert_eq!(saved.schedule_id, Some(41));
    }

    #[test]
    fn save_preview_failed_status_is_an_error() {
        let transport = Arc::new(ScriptedTransport::default().with(
            "save_preview",
            Ok(json!({ "success": false, "message": "teacher 4 unavailable" })),
        ));
        let api = SchedulingApi::new(transport);
        let req: GenerationRequest = serde_json::from_value(json!({
            "academic_year_id": 1, "session_type": "evening", "class_id": 2,
            "name": "n", "session_start_time": "13:00", "period_duration": 45,
            "periods_per_day": 6, "break_duration": 15, "working_days": [1,2,3,4,5],
            "auto_assign_teachers": true, "avoid_teacher_conflicts": true,
            "balance_teacher_load": true, "prefer_subject_continuity": false
        }))
        .expect("request");
        let err = api.save_preview(&req, Vec::new()).expect_err("rejected");
        assert_eq!(err.code(), "server_error");
        assert!(err.to_string().contains("teacher 4 unavailable"));
    }

    #[test]
    fn diagnostics_drops_null_recommendations() {
        let transport = Arc::new(ScriptedTransport::default().with(
            "diagnostics",
            Ok(json!({
                "is_ready_for_generation": false,
                "issues": {
                    "missing_subjects": [{ "class_id": 3, "class_name": "G3", "issue": "no subjects" }],
                    "missing_teacher_assignments": []
                },
                "recommendations": ["add subjects", null, null]
            })),
        ));
        let api = SchedulingApi::new(transport);
        let d = api.diagnostics(2025, SessionType::Morning).expect("diagnostics");
        assert!(!d.is_ready_for_generation);
        assert_eq!(d.recommendations, vec!["add subjects".to_string()]);
        assert_eq!(d.issues.missing_subjects.len(), 1);
    }
}
