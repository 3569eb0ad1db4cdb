use crate::generation::{committed_schedule_id, map_to_assignments, NameLookup};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    applied, clear_cache, param_step, param_str, persist, require_api, require_db, require_scope,
    require_target, require_workflow, snapshot, spawn_job, sync_cycle,
};
use crate::ipc::types::{AppState, Request};
use crate::jobs::{JobKind, JobResult};
use crate::model::{Assignment, ClassTarget, ScheduleConstraint, Step};
use crate::workflow::StepPayload;
use serde_json::{json, Value};

fn handle_state(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    require_workflow(state)?;
    Ok(snapshot(state))
}

fn handle_reset(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    require_workflow(state)?.reset();
    clear_cache(state);
    state.bump_epoch();
    tracing::info!("wizard reset");
    Ok(applied(state, true))
}

fn parse_target(params: &Value) -> Result<ClassTarget, HandlerErr> {
    let raw = params
        .get("target")
        .cloned()
        .ok_or_else(|| HandlerErr::new("bad_params", "missing target"))?;
    let target: ClassTarget = serde_json::from_value(raw)
        .map_err(|e| HandlerErr::new("bad_params", format!("invalid target: {}", e)))?;
    if target.class_id <= 0 {
        return Err(HandlerErr::new("bad_params", "classId must be positive"));
    }
    Ok(target)
}

fn handle_select_class(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let target = parse_target(&req.params)?;
    let api = require_api(state)?;
    let mut scope = require_scope(state)?;
    // The class is being chosen, so the outcome is not tied to the current one.
    scope.class_id = None;
    let context = scope.context;
    spawn_job(state, JobKind::SelectClass, scope, move |progress| {
        let raw = api.class_schedule(context, &target)?;
        progress(crate::generation::GenerationEvent::Progress(50));
        let schedule_id = committed_schedule_id(&raw);
        let committed = if raw.is_empty() {
            Vec::new()
        } else {
            map_to_assignments(&raw, &NameLookup::fetch(&api)).assignments
        };
        Ok(JobResult::ClassChecked {
            target,
            committed,
            schedule_id,
        })
    })
}

pub fn apply_class_checked(
    state: &mut AppState,
    target: ClassTarget,
    committed: Vec<Assignment>,
    schedule_id: Option<i64>,
) -> Value {
    let Some(wf) = state.workflow.as_mut() else {
        return json!({ "applied": false });
    };
    let previous = wf.draft().target.clone();
    let has_existing = !committed.is_empty();
    let done = wf.complete_step(
        Step::Filter,
        StepPayload::Target {
            target: target.clone(),
            has_existing_schedule: has_existing,
        },
    );
    if done && has_existing {
        wf.set_committed(committed, schedule_id);
    }
    if previous.as_ref() != Some(&target) {
        sync_cycle(state);
        state.board.clear();
        state.last_generation = None;
    }
    persist(state);
    json!({
        "applied": done,
        "hasExistingSchedule": has_existing,
        "scheduleId": schedule_id,
        "state": snapshot(state),
    })
}

fn handle_complete_step(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let step = param_step(&req.params)?;
    let payload = match step {
        Step::Validate => {
            let can_proceed = req
                .params
                .get("canProceed")
                .and_then(|v| v.as_bool())
                .ok_or_else(|| HandlerErr::new("bad_params", "canProceed must be boolean"))?;
            StepPayload::Readiness { can_proceed }
        }
        _ => StepPayload::Empty,
    };
    let done = require_workflow(state)?.complete_step(step, payload);
    if done {
        persist(state);
    }
    Ok(applied(state, done))
}

fn handle_advance(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let done = require_workflow(state)?.advance();
    if done {
        persist(state);
    }
    Ok(applied(state, done))
}

fn handle_retreat(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let done = require_workflow(state)?.retreat();
    if done {
        persist(state);
    }
    Ok(applied(state, done))
}

fn handle_jump_to(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let step = param_step(&req.params)?;
    let done = require_workflow(state)?.jump_to(step);
    if done {
        persist(state);
    }
    Ok(applied(state, done))
}

fn handle_confirm_replace(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let confirmed = req
        .params
        .get("confirmed")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::new("bad_params", "confirmed must be boolean"))?;
    let done = require_workflow(state)?.confirm_replace(confirmed);
    if done {
        persist(state);
    }
    Ok(applied(state, done))
}

fn handle_constraints_add(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let raw = req
        .params
        .get("constraint")
        .cloned()
        .ok_or_else(|| HandlerErr::new("bad_params", "missing constraint"))?;
    let mut constraint: ScheduleConstraint = serde_json::from_value(raw)
        .map_err(|e| HandlerErr::new("bad_params", format!("invalid constraint: {}", e)))?;
    let options = setup::scheduling_options(require_db(state)?)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    constraint
        .validate(options.periods_per_day)
        .map_err(|msg| HandlerErr::new("bad_params", msg))?;
    if constraint.id.trim().is_empty() {
        constraint.id = uuid::Uuid::new_v4().to_string();
    }
    let id = constraint.id.clone();
    let done = require_workflow(state)?.add_constraint(constraint);
    if done {
        sync_cycle(state);
        persist(state);
    }
    let mut out = applied(state, done);
    out["constraintId"] = json!(id);
    Ok(out)
}

fn handle_constraints_remove(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let id = param_str(&req.params, "id")?.to_string();
    let done = require_workflow(state)?.remove_constraint(&id);
    if done {
        sync_cycle(state);
        persist(state);
    }
    Ok(applied(state, done))
}

fn handle_validate(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let target = require_target(state)?;
    let api = require_api(state)?;
    let scope = require_scope(state)?;
    let context = scope.context;
    spawn_job(state, JobKind::Validate, scope, move |_progress| {
        Ok(JobResult::Validated(api.validate(context, &target)?))
    })
}

pub fn apply_validated(state: &mut AppState, report: crate::backend::ValidationReport) -> Value {
    let Some(wf) = state.workflow.as_mut() else {
        return json!({ "applied": false });
    };
    let done = wf.complete_step(
        Step::Validate,
        StepPayload::Readiness {
            can_proceed: report.can_proceed,
        },
    );
    persist(state);
    json!({
        "applied": done,
        "report": report,
        "state": snapshot(state),
    })
}

fn parse_cell(params: &Value, key: &str) -> Result<(u8, u8), HandlerErr> {
    let cell = params
        .get(key)
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))?;
    let part = |name: &str| {
        cell.get(name)
            .and_then(|v| v.as_u64())
            .and_then(|n| u8::try_from(n).ok())
            .ok_or_else(|| HandlerErr::new("bad_params", format!("{}.{} must be a small integer", key, name)))
    };
    Ok((part("day")?, part("period")?))
}

fn handle_preview_swap(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let from = parse_cell(&req.params, "from")?;
    let to = parse_cell(&req.params, "to")?;
    let done = require_workflow(state)?.swap_preview_cells(from, to);
    if done {
        persist(state);
    }
    Ok(applied(state, done))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "wizard.state" => handle_state(state, req),
        "wizard.reset" => handle_reset(state, req),
        "wizard.selectClass" => handle_select_class(state, req),
        "wizard.completeStep" => handle_complete_step(state, req),
        "wizard.advance" => handle_advance(state, req),
        "wizard.retreat" => handle_retreat(state, req),
        "wizard.jumpTo" => handle_jump_to(state, req),
        "wizard.confirmReplace" => handle_confirm_replace(state, req),
        "wizard.constraints.add" => handle_constraints_add(state, req),
        "wizard.constraints.remove" => handle_constraints_remove(state, req),
        "wizard.validate" => handle_validate(state, req),
        "preview.swap" => handle_preview_swap(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
