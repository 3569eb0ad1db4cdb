use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::{err, schedule_error_details};
use crate::jobs::{self, JobDone, JobKind, JobResult, JobScope};
use serde_json::json;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::setup::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::wizard::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::generation::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::conflicts::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::export::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}

fn is_current(state: &AppState, scope: &JobScope) -> bool {
    let Some(current) = state.current_scope() else {
        return false;
    };
    scope.context == current.context
        && scope.epoch == current.epoch
        && (scope.class_id.is_none() || scope.class_id == current.class_id)
}

/// Applies a finished job to current state and returns the event to emit.
/// Outcomes for a draft that is no longer current are dropped.
pub fn apply_job(state: &mut AppState, done: JobDone) -> serde_json::Value {
    let JobDone {
        job_id,
        kind,
        scope,
        result,
    } = done;
    state.jobs.finish(&job_id);

    if !is_current(state, &scope) {
        tracing::info!(job = %job_id, kind = kind.as_str(), "stale job outcome discarded");
        return jobs::event("job.discarded", &job_id, kind, json!({ "reason": "stale" }));
    }

    match result {
        Ok(result) => {
            let payload = match result {
                JobResult::ClassChecked {
                    target,
                    committed,
                    schedule_id,
                } => handlers::wizard::apply_class_checked(state, target, committed, schedule_id),
                JobResult::Validated(report) => handlers::wizard::apply_validated(state, report),
                JobResult::Generated(outcome) => {
                    handlers::generation::apply_generated(state, outcome)
                }
                JobResult::Diagnosed(d) => handlers::generation::apply_diagnosed(state, d),
                JobResult::Committed(outcome) => {
                    handlers::generation::apply_committed(state, outcome)
                }
                JobResult::Refreshed(committed) => {
                    handlers::generation::apply_refreshed(state, committed)
                }
                JobResult::Analyzed(analysis) => {
                    handlers::conflicts::apply_analyzed(state, analysis)
                }
                JobResult::SavedAsDraft(v) => handlers::conflicts::apply_saved_as_draft(state, v),
                JobResult::Published(v) => handlers::conflicts::apply_published(state, v),
            };
            jobs::event("job.finished", &job_id, kind, json!({ "result": payload }))
        }
        Err(e) => {
            match kind {
                JobKind::Generate => handlers::generation::generation_failed(state, &e),
                JobKind::CommitPreview => handlers::generation::publish_failed(state),
                _ => {}
            }
            jobs::event(
                "job.failed",
                &job_id,
                kind,
                json!({
                    "error": {
                        "code": e.code(),
                        "message": e.to_string(),
                        "details": schedule_error_details(&e),
                    }
                }),
            )
        }
    }
}
