use crate::backend::SchedulingApi;
use crate::cache::{now_ms, DraftCache};
use crate::generation::GenerationEvent;
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::setup;
use crate::ipc::types::AppState;
use crate::jobs::{self, JobKind, JobResult, JobScope};
use crate::error::ScheduleResult;
use crate::model::{ClassTarget, Step};
use crate::workflow::Workflow;
use rusqlite::Connection;
use serde_json::{json, Value};

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn require_workflow(state: &mut AppState) -> Result<&mut Workflow, HandlerErr> {
    state
        .workflow
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_context", "set the academic context first"))
}

pub fn require_api(state: &AppState) -> Result<SchedulingApi, HandlerErr> {
    state
        .api
        .clone()
        .ok_or_else(|| HandlerErr::new("no_backend", "configure setup.backend first"))
}

pub fn require_target(state: &AppState) -> Result<ClassTarget, HandlerErr> {
    state
        .workflow
        .as_ref()
        .and_then(|wf| wf.draft().target.clone())
        .ok_or_else(|| HandlerErr::new("no_target", "select a class first"))
}

pub fn require_scope(state: &AppState) -> Result<JobScope, HandlerErr> {
    state
        .current_scope()
        .ok_or_else(|| HandlerErr::new("no_context", "set the academic context first"))
}

pub fn param_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn param_step(params: &Value) -> Result<Step, HandlerErr> {
    let raw = param_str(params, "step")?;
    Step::parse(raw).ok_or_else(|| HandlerErr::new("bad_params", format!("unknown step: {}", raw)))
}

/// Writes the in-memory draft through to the cache. Failures are logged only.
pub fn persist(state: &mut AppState) {
    let (Some(conn), Some(wf)) = (state.db.as_ref(), state.workflow.as_mut()) else {
        return;
    };
    if !wf.is_persistable() {
        return;
    }
    let cache = DraftCache::new(conn, setup::cache_policy(conn));
    if let Err(e) = cache.save(wf.draft_mut()) {
        tracing::warn!(error = %e, "draft save failed");
    }
}

/// Realigns the generation phase with the draft unless a call is in flight.
pub fn sync_cycle(state: &mut AppState) {
    if state.cycle.is_busy() {
        return;
    }
    let has_preview = state
        .workflow
        .as_ref()
        .map(|wf| wf.draft().is_preview_mode)
        .unwrap_or(false);
    state.cycle.restore(has_preview);
}

pub fn clear_cache(state: &AppState) {
    let Some(conn) = state.db.as_ref() else {
        return;
    };
    let cache = DraftCache::new(conn, setup::cache_policy(conn));
    if let Err(e) = cache.clear() {
        tracing::warn!(error = %e, "draft clear failed");
    }
}

pub fn snapshot(state: &AppState) -> Value {
    let Some(wf) = state.workflow.as_ref() else {
        return json!({ "context": null });
    };
    let mut v = wf.snapshot();
    v["generationPhase"] = json!(state.cycle.phase());
    v["pendingJobs"] = json!(state.jobs.running());
    v["conflicts"] = match state.board.active() {
        Some(a) => json!({
            "criticalCount": a.critical_count,
            "warningCount": a.warning_count,
            "infoCount": a.info_count,
            "canPublish": a.can_publish,
            "canSaveAsDraft": a.can_save_as_draft,
        }),
        None => Value::Null,
    };
    v
}

/// Result body for a navigation-style request.
pub fn applied(state: &AppState, applied: bool) -> Value {
    json!({ "applied": applied, "state": snapshot(state) })
}

pub fn refused(reason: &str) -> Value {
    json!({ "applied": false, "pending": false, "reason": reason })
}

pub fn spawn_job<F>(
    state: &mut AppState,
    kind: JobKind,
    scope: JobScope,
    work: F,
) -> Result<Value, HandlerErr>
where
    F: FnOnce(&mut dyn FnMut(GenerationEvent)) -> ScheduleResult<JobResult> + Send + 'static,
{
    let job_id = state
        .jobs
        .spawn(kind, scope, work)
        .map_err(|e| HandlerErr::new("job_spawn_failed", e.to_string()))?;
    state
        .outbox
        .push(jobs::event("job.started", &job_id, kind, json!({ "atMs": now_ms() })));
    Ok(json!({ "jobId": job_id, "pending": true }))
}
