use crate::backend::{FixtureTransport, HttpTransport, SchedulingApi};
use crate::cache::CachePolicy;
use crate::db;
use crate::generation::GenerationOptions;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Duration;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

const SCHEDULING_FIELDS: &[&str] = &[
    "periodsPerDay",
    "periodDurationMinutes",
    "sessionStartTime",
    "breakPeriods",
    "breakDurationMinutes",
    "workingDays",
    "autoAssignTeachers",
    "avoidTeacherConflicts",
    "balanceTeacherLoad",
    "preferSubjectContinuity",
    "draftMaxAgeHours",
    "hiddenPreviewLimitMinutes",
];

#[derive(Clone, Copy)]
enum SetupSection {
    Scheduling,
    Backend,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduling" => Some(Self::Scheduling),
            "backend" => Some(Self::Backend),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Scheduling => "setup.scheduling",
            Self::Backend => "setup.backend",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Scheduling => {
            serde_json::to_value(GenerationOptions::default()).unwrap_or_else(|_| json!({}))
        }
        SetupSection::Backend => json!({
            "kind": "http",
            "baseUrl": "",
            "timeoutSeconds": 60,
            "authToken": null,
            "fixturePath": null
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_nullable_string_max(v: &Value, key: &str, max_len: usize) -> Result<Value, String> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let s = parse_string_max(v, key, max_len)?;
    if s.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::String(s))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    match section {
        SetupSection::Scheduling => {
            if let Some(k) = patch.keys().find(|k| !SCHEDULING_FIELDS.contains(&k.as_str())) {
                return Err(format!("unknown scheduling field: {}", k));
            }
            let base: GenerationOptions =
                serde_json::from_value(current.clone()).unwrap_or_default();
            let merged = base.with_overrides(&Value::Object(patch.clone()))?;
            *current = serde_json::to_value(merged).map_err(|e| e.to_string())?;
        }
        SetupSection::Backend => {
            let obj = as_object_mut(current)?;
            for (k, v) in patch {
                match k.as_str() {
                    "kind" => {
                        let s = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                        if s != "http" && s != "fixture" {
                            return Err("kind must be one of: http, fixture".into());
                        }
                        obj.insert(k.clone(), Value::String(s));
                    }
                    "baseUrl" => {
                        obj.insert(k.clone(), Value::String(parse_string_max(v, k, 512)?));
                    }
                    "timeoutSeconds" => {
                        obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 600)?));
                    }
                    "authToken" => {
                        obj.insert(k.clone(), parse_nullable_string_max(v, k, 4096)?);
                    }
                    "fixturePath" => {
                        obj.insert(k.clone(), parse_nullable_string_max(v, k, 1024)?);
                    }
                    _ => return Err(format!("unknown backend field: {}", k)),
                }
            }
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut out = default_section(section);
    if let Some(stored) = db::settings_get_json(conn, section.key())? {
        if let (Some(dst), Some(src)) = (out.as_object_mut(), stored.as_object()) {
            for (k, v) in src {
                dst.insert(k.clone(), v.clone());
            }
        }
    }
    Ok(out)
}

pub fn scheduling_options(conn: &Connection) -> anyhow::Result<GenerationOptions> {
    let v = load_section(conn, SetupSection::Scheduling)?;
    Ok(serde_json::from_value(v)?)
}

pub fn cache_policy(conn: &Connection) -> CachePolicy {
    let o = match scheduling_options(conn) {
        Ok(o) => o,
        Err(e) => {
            tracing::warn!(error = %e, "scheduling settings unreadable; default cache policy");
            return CachePolicy::default();
        }
    };
    let limits = o.check().ok().and_then(|_| {
        Some(CachePolicy {
            max_age: Duration::try_hours(o.draft_max_age_hours)?,
            hidden_preview_limit: Duration::try_minutes(o.hidden_preview_limit_minutes)?,
        })
    });
    limits.unwrap_or_else(|| {
        tracing::warn!(
            draft_max_age_hours = o.draft_max_age_hours,
            hidden_preview_limit_minutes = o.hidden_preview_limit_minutes,
            "stored cache limits out of range; default cache policy"
        );
        CachePolicy::default()
    })
}

/// Builds the collaborator client from `setup.backend`. `None` while no
/// endpoint is configured.
pub fn backend_api(conn: &Connection, workspace: &std::path::Path) -> anyhow::Result<Option<SchedulingApi>> {
    let v = load_section(conn, SetupSection::Backend)?;
    let kind = v.get("kind").and_then(|k| k.as_str()).unwrap_or("http");
    match kind {
        "fixture" => {
            let Some(raw) = v.get("fixturePath").and_then(|p| p.as_str()) else {
                return Ok(None);
            };
            let mut dir = PathBuf::from(raw);
            if dir.is_relative() {
                dir = workspace.join(dir);
            }
            let transport = FixtureTransport::new(&dir)?;
            Ok(Some(SchedulingApi::new(Arc::new(transport))))
        }
        _ => {
            let base_url = v.get("baseUrl").and_then(|u| u.as_str()).unwrap_or("");
            if base_url.is_empty() {
                return Ok(None);
            }
            let timeout = v.get("timeoutSeconds").and_then(|t| t.as_u64()).unwrap_or(60);
            let token = v
                .get("authToken")
                .and_then(|t| t.as_str())
                .map(str::to_string);
            let transport =
                HttpTransport::new(base_url, std::time::Duration::from_secs(timeout), token)?;
            Ok(Some(SchedulingApi::new(Arc::new(transport))))
        }
    }
}

/// Re-reads `setup.backend` into `state.api`.
pub fn reload_backend(state: &mut AppState) -> anyhow::Result<()> {
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_ref()) else {
        state.api = None;
        return Ok(());
    };
    state.api = backend_api(conn, workspace)?;
    match state.api.as_ref() {
        Some(api) => tracing::info!(backend = %api.describe(), "scheduling backend configured"),
        None => tracing::info!("no scheduling backend configured"),
    }
    Ok(())
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let scheduling = match load_section(conn, SetupSection::Scheduling) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut backend = match load_section(conn, SetupSection::Backend) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    // Never echo the token back.
    if let Some(obj) = backend.as_object_mut() {
        let has_token = obj.get("authToken").map(|t| !t.is_null()).unwrap_or(false);
        obj.remove("authToken");
        obj.insert("hasAuthToken".into(), Value::Bool(has_token));
    }

    ok(
        &req.id,
        json!({
            "scheduling": scheduling,
            "backend": backend
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let SetupSection::Backend = section {
        if let Err(e) = reload_backend(state) {
            return err(&req.id, "backend_invalid", e.to_string(), None);
        }
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
