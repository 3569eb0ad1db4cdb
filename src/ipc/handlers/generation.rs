use crate::backend::Diagnostics;
use crate::error::ScheduleError;
use crate::generation::{self, build_request, CommitOutcome, GenerationOutcome};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    clear_cache, persist, refused, require_api, require_db, require_scope, require_target,
    snapshot, spawn_job,
};
use crate::ipc::types::{AppState, Request};
use crate::jobs::{JobKind, JobResult};
use crate::model::Step;
use serde_json::{json, Value};

fn handle_start(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let target = require_target(state)?;
    let api = require_api(state)?;
    let scope = require_scope(state)?;
    let overrides = req.params.get("options").cloned().unwrap_or(Value::Null);
    let fetch_diagnostics = req
        .params
        .get("fetchDiagnostics")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    let options = setup::scheduling_options(require_db(state)?)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .with_overrides(&overrides)
        .map_err(|msg| HandlerErr::new("bad_params", msg))?;

    let Some(wf) = state.workflow.as_ref() else {
        return Err(HandlerErr::new("no_context", "set the academic context first"));
    };
    if !wf.is_complete(Step::Constraints) {
        return Ok(refused("constraints_incomplete"));
    }
    let request = build_request(scope.context, &target, &options, &wf.draft().constraints);
    if !state.cycle.begin_generation() {
        return Ok(refused("busy"));
    }
    tracing::info!(class_id = target.class_id, name = %request.name, "generation requested");
    let spawned = spawn_job(state, JobKind::Generate, scope, move |progress| {
        Ok(JobResult::Generated(generation::run_generation(
            &api,
            &request,
            fetch_diagnostics,
            progress,
        )?))
    });
    if spawned.is_err() {
        state.cycle.finish_generation(false);
    }
    spawned
}

pub fn apply_generated(state: &mut AppState, outcome: GenerationOutcome) -> Value {
    match outcome {
        GenerationOutcome::Preview {
            assignments,
            request,
            warnings,
            dropped,
            conflicts_detected,
        } => {
            let count = assignments.len();
            let applied = state
                .workflow
                .as_mut()
                .map(|wf| wf.apply_preview(assignments, request))
                .unwrap_or(false);
            state.cycle.finish_generation(applied);
            let summary = json!({
                "outcome": "preview",
                "assignmentCount": count,
                "warnings": warnings,
                "qualifiedSuccess": !warnings.is_empty(),
                "dropped": dropped,
                "conflictsDetected": conflicts_detected,
            });
            state.last_generation = Some(summary.clone());
            persist(state);
            json!({ "applied": applied, "generation": summary, "state": snapshot(state) })
        }
        GenerationOutcome::SoftFailure {
            warnings,
            diagnostics,
        } => {
            state.cycle.finish_generation(false);
            let summary = json!({
                "outcome": "softFailure",
                "warnings": warnings,
                "diagnostics": diagnostics,
            });
            state.last_generation = Some(summary.clone());
            json!({ "applied": false, "generation": summary, "state": snapshot(state) })
        }
    }
}

pub fn generation_failed(state: &mut AppState, e: &ScheduleError) {
    state.cycle.finish_generation(false);
    state.last_generation = Some(json!({
        "outcome": "error",
        "code": e.code(),
        "message": e.to_string(),
    }));
}

fn handle_diagnostics(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let api = require_api(state)?;
    let mut scope = require_scope(state)?;
    scope.class_id = None;
    let context = scope.context;
    spawn_job(state, JobKind::Diagnostics, scope, move |_progress| {
        Ok(JobResult::Diagnosed(
            api.diagnostics(context.academic_year_id, context.session_type)?,
        ))
    })
}

pub fn apply_diagnosed(state: &mut AppState, diagnostics: Diagnostics) -> Value {
    if let Some(last) = state.last_generation.as_mut() {
        if last["outcome"] == "softFailure" {
            last["diagnostics"] = json!(diagnostics);
        }
    }
    json!({ "diagnostics": diagnostics })
}

fn handle_status(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    Ok(json!({
        "phase": state.cycle.phase(),
        "last": state.last_generation,
    }))
}

fn handle_publish(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let target = require_target(state)?;
    let api = require_api(state)?;
    let scope = require_scope(state)?;
    let Some(wf) = state.workflow.as_ref() else {
        return Err(HandlerErr::new("no_context", "set the academic context first"));
    };
    let draft = wf.draft();
    let (Some(request), Some(preview)) = (
        draft.generation_request.clone(),
        draft.preview_assignments.clone().filter(|p| !p.is_empty()),
    ) else {
        return Ok(refused("no_preview"));
    };
    if !draft.is_preview_mode {
        return Ok(refused("no_preview"));
    }
    if !state.cycle.begin_publish() {
        return Ok(refused("busy"));
    }
    let context = scope.context;
    let spawned = spawn_job(state, JobKind::CommitPreview, scope, move |progress| {
        Ok(JobResult::Committed(generation::run_commit(
            &api, context, &target, &request, &preview, progress,
        )?))
    });
    if spawned.is_err() {
        state.cycle.finish_publish(false);
    }
    spawned
}

pub fn apply_committed(state: &mut AppState, outcome: CommitOutcome) -> Value {
    let count = outcome.committed.len();
    let applied = state
        .workflow
        .as_mut()
        .map(|wf| wf.mark_published(outcome.committed, outcome.schedule_id))
        .unwrap_or(false);
    state.cycle.finish_publish(applied);
    state.board.clear();
    // The server holds the schedule now; the local draft has served its purpose.
    clear_cache(state);
    tracing::info!(schedule_id = ?outcome.schedule_id, assignments = count, "preview committed");
    json!({
        "applied": applied,
        "scheduleId": outcome.schedule_id,
        "committedCount": count,
        "refetchError": outcome.refetch_error,
        "state": snapshot(state),
    })
}

pub fn publish_failed(state: &mut AppState) {
    state.cycle.finish_publish(false);
}

fn handle_view_refresh(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let target = require_target(state)?;
    let api = require_api(state)?;
    let scope = require_scope(state)?;
    let in_preview = state
        .workflow
        .as_ref()
        .map(|wf| wf.draft().is_preview_mode)
        .unwrap_or(false);
    if in_preview {
        return Ok(refused("preview_mode"));
    }
    let context = scope.context;
    spawn_job(state, JobKind::RefreshView, scope, move |_progress| {
        Ok(JobResult::Refreshed(generation::fetch_committed(
            &api, context, &target,
        )?))
    })
}

pub fn apply_refreshed(state: &mut AppState, committed: Vec<crate::model::Assignment>) -> Value {
    let count = committed.len();
    let applied = state
        .workflow
        .as_mut()
        .map(|wf| wf.set_committed(committed, None))
        .unwrap_or(false);
    if applied {
        persist(state);
    }
    json!({ "applied": applied, "committedCount": count, "state": snapshot(state) })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "generation.start" => handle_start(state, req),
        "generation.diagnostics" => handle_diagnostics(state, req),
        "generation.status" => handle_status(state, req),
        "generation.publish" => handle_publish(state, req),
        "view.refresh" => handle_view_refresh(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
