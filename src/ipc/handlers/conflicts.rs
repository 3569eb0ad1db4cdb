use crate::conflicts::{self, SeverityFilter};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    applied, clear_cache, param_str, persist, refused, require_api, require_scope,
    require_workflow, snapshot, spawn_job,
};
use crate::ipc::types::{AppState, Request};
use crate::jobs::{JobKind, JobResult};
use crate::model::ConflictAnalysis;
use serde_json::{json, Value};

/// Conflict work only applies to a committed schedule.
fn committed_schedule_id(state: &AppState, params: &Value) -> Result<Option<i64>, HandlerErr> {
    let Some(wf) = state.workflow.as_ref() else {
        return Err(HandlerErr::new("no_context", "set the academic context first"));
    };
    if wf.draft().is_preview_mode {
        return Ok(None);
    }
    Ok(params
        .get("scheduleId")
        .and_then(|v| v.as_i64())
        .or(wf.draft().schedule_id)
        .filter(|id| *id > 0))
}

fn handle_analyze(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let Some(schedule_id) = committed_schedule_id(state, &req.params)? else {
        return Ok(refused("no_committed_schedule"));
    };
    let api = require_api(state)?;
    let scope = require_scope(state)?;
    spawn_job(state, JobKind::AnalyzeConflicts, scope, move |_progress| {
        Ok(JobResult::Analyzed(conflicts::analyze(&api, schedule_id)?))
    })
}

pub fn apply_analyzed(state: &mut AppState, analysis: ConflictAnalysis) -> Value {
    state.board.load(analysis);
    let unresolved = state.board.has_unresolved();
    let entered = state
        .workflow
        .as_mut()
        .map(|wf| wf.enter_conflicts(unresolved))
        .unwrap_or(false);
    if entered {
        persist(state);
    }
    json!({
        "analysis": state.board.active(),
        "enteredConflicts": entered,
        "state": snapshot(state),
    })
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let severity = req
        .params
        .get("severity")
        .and_then(|v| v.as_str())
        .unwrap_or("all");
    let by = SeverityFilter::parse(severity)
        .ok_or_else(|| HandlerErr::new("bad_params", "severity must be all|critical|warning|info"))?;
    let Some(fetched) = state.board.fetched() else {
        return Ok(json!({ "analysis": null, "items": [] }));
    };
    let items: Vec<Value> = conflicts::filter(fetched, by)
        .into_iter()
        .map(|c| {
            let mut v = json!(c);
            v["resolved"] = json!(state.board.is_resolved(&c.id));
            v
        })
        .collect();
    Ok(json!({
        "scheduleId": fetched.schedule_id,
        "severity": severity,
        "items": items,
        "resolvedIds": state.board.resolved_ids(),
        "analysis": state.board.active(),
    }))
}

fn handle_mark_resolved(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = param_str(&req.params, "id")?.to_string();
    let done = state.board.mark_resolved(&id);
    if !done {
        tracing::debug!(conflict = %id, "resolve refused");
    }
    Ok(json!({
        "applied": done,
        "analysis": state.board.active(),
    }))
}

fn handle_resolved(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let can_publish = state.board.can_publish();
    let done = require_workflow(state)?.resolve_conflicts(can_publish);
    if done {
        persist(state);
    }
    Ok(applied(state, done))
}

fn handle_save_as_draft(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let Some(schedule_id) = committed_schedule_id(state, &req.params)? else {
        return Ok(refused("no_committed_schedule"));
    };
    if state.jobs.is_running(JobKind::SaveAsDraft) {
        return Ok(refused("busy"));
    }
    let api = require_api(state)?;
    let scope = require_scope(state)?;
    spawn_job(state, JobKind::SaveAsDraft, scope, move |_progress| {
        Ok(JobResult::SavedAsDraft(api.save_as_draft(schedule_id)?))
    })
}

pub fn apply_saved_as_draft(state: &mut AppState, response: Value) -> Value {
    json!({ "response": response, "state": snapshot(state) })
}

fn handle_publish(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let Some(schedule_id) = committed_schedule_id(state, &req.params)? else {
        return Ok(refused("no_committed_schedule"));
    };
    if state.board.fetched().is_some() && !state.board.can_publish() {
        return Ok(refused("critical_conflicts"));
    }
    if state.jobs.is_running(JobKind::PublishSchedule) || state.cycle.is_busy() {
        return Ok(refused("busy"));
    }
    let api = require_api(state)?;
    let scope = require_scope(state)?;
    spawn_job(state, JobKind::PublishSchedule, scope, move |_progress| {
        Ok(JobResult::Published(api.publish(schedule_id)?))
    })
}

pub fn apply_published(state: &mut AppState, response: Value) -> Value {
    clear_cache(state);
    tracing::info!("schedule published");
    json!({ "response": response, "state": snapshot(state) })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "conflicts.analyze" => handle_analyze(state, req),
        "conflicts.list" => handle_list(state, req),
        "conflicts.markResolved" => handle_mark_resolved(state, req),
        "conflicts.resolved" => handle_resolved(state, req),
        "schedule.saveAsDraft" => handle_save_as_draft(state, req),
        "schedule.publish" => handle_publish(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
