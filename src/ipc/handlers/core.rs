use crate::cache::{now_ms, DraftCache};
use crate::db;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{persist, require_db, snapshot, sync_cycle};
use crate::ipc::types::{AppState, Request};
use crate::model::{AcademicContext, SessionType};
use crate::workflow::Workflow;
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "backend": state.api.as_ref().map(|a| a.describe()),
            "context": state.context(),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            // A broken backend section must not prevent the workspace from opening.
            let backend_error = setup::reload_backend(state).err().map(|e| e.to_string());
            if let Some(e) = &backend_error {
                tracing::warn!(error = %e, "backend settings rejected");
                state.api = None;
            }
            // Whatever draft was in memory belonged to the previous workspace.
            let previous = state.context();
            state.workflow = None;
            state.bump_epoch();
            let restored = previous.map(|ctx| activate_context(state, ctx));
            tracing::info!(workspace = %path.to_string_lossy(), "workspace selected");
            ok(
                &req.id,
                json!({
                    "workspacePath": path.to_string_lossy(),
                    "backendError": backend_error,
                    "context": restored,
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn parse_context(params: &serde_json::Value) -> Result<AcademicContext, HandlerErr> {
    let academic_year_id = params
        .get("academicYearId")
        .and_then(|v| v.as_i64())
        .filter(|id| *id > 0)
        .ok_or_else(|| HandlerErr::new("bad_params", "academicYearId must be a positive integer"))?;
    let session_type = params
        .get("sessionType")
        .and_then(|v| v.as_str())
        .and_then(SessionType::parse)
        .ok_or_else(|| HandlerErr::new("bad_params", "sessionType must be morning or evening"))?;
    Ok(AcademicContext {
        academic_year_id,
        session_type,
    })
}

/// Makes `ctx` the active context. A cached draft for another context is
/// dropped; one for this context is restored when nothing is in memory yet.
fn activate_context(state: &mut AppState, ctx: AcademicContext) -> serde_json::Value {
    let unchanged = state.context() == Some(ctx);
    let mut invalidated = false;
    let mut restored = None;
    if let Some(conn) = state.db.as_ref() {
        let cache = DraftCache::new(conn, setup::cache_policy(conn));
        invalidated = cache.invalidate_if_context_changed(ctx);
        if !unchanged {
            restored = cache.load();
        }
    }
    if !unchanged {
        if state.workflow.is_some() {
            tracing::info!(
                year = ctx.academic_year_id,
                session = ctx.session_type.as_str(),
                "academic context changed; draft reset"
            );
        }
        state.bump_epoch();
        let wf = match restored {
            Some(draft) => Workflow::from_draft(draft),
            None => Workflow::new(ctx),
        };
        state.cycle.restore(wf.draft().is_preview_mode && wf.draft().has_preview_data());
        state.workflow = Some(wf);
    }
    json!({
        "changed": !unchanged,
        "invalidated": invalidated,
        "restored": !unchanged && state
            .workflow
            .as_ref()
            .map(|wf| wf.is_persistable())
            .unwrap_or(false),
        "state": snapshot(state),
    })
}

fn handle_context_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_db(state) {
        return e.response(&req.id);
    }
    match parse_context(&req.params) {
        Ok(ctx) => {
            let result = activate_context(state, ctx);
            ok(&req.id, result)
        }
        Err(e) => e.response(&req.id),
    }
}

// Another window changed the global selection; same rules as a local change.
fn handle_context_storage_changed(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_db(state) {
        return e.response(&req.id);
    }
    let ctx = match parse_context(&req.params) {
        Ok(ctx) => ctx,
        Err(e) => return e.response(&req.id),
    };
    tracing::debug!(year = ctx.academic_year_id, "storage change signal");
    let result = activate_context(state, ctx);
    ok(&req.id, result)
}

fn handle_visibility_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(hidden) = req.params.get("hidden").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "hidden must be boolean", None);
    };
    let at = req
        .params
        .get("atMs")
        .and_then(|v| v.as_i64())
        .unwrap_or_else(now_ms);
    let policy = match state.db.as_ref() {
        Some(conn) => setup::cache_policy(conn),
        None => Default::default(),
    };
    let Some(wf) = state.workflow.as_mut() else {
        return ok(&req.id, json!({ "previewExpired": false }));
    };
    let expired = if hidden {
        wf.set_hidden(at);
        false
    } else {
        wf.set_visible(at, &policy)
    };
    if expired {
        tracing::info!("preview expired while hidden; back to generate");
        sync_cycle(state);
    }
    persist(state);
    ok(
        &req.id,
        json!({ "previewExpired": expired, "state": snapshot(state) }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "context.set" => Some(handle_context_set(state, req)),
        "context.storageChanged" => Some(handle_context_storage_changed(state, req)),
        "visibility.set" => Some(handle_visibility_set(state, req)),
        _ => None,
    }
}
