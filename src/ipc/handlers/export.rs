use crate::cache::now_ms;
use crate::export;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{clear_cache, refused, snapshot};
use crate::ipc::types::{AppState, Request};
use crate::model::Step;
use rusqlite::params;
use serde_json::json;
use std::path::PathBuf;

fn handle_export_write(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(out_path) = req
        .params
        .get("outPath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
    else {
        return err(&req.id, "bad_params", "missing outPath", None);
    };
    let Some(wf) = state.workflow.as_ref() else {
        return err(&req.id, "no_context", "set the academic context first", None);
    };
    let draft = wf.draft();
    let Some(target) = draft.target.clone() else {
        return ok(&req.id, refused("no_target"));
    };
    if wf.current_step() != Step::Export
        || draft.is_preview_mode
        || draft.committed_assignments.is_empty()
    {
        return ok(&req.id, refused("not_exportable"));
    }

    let exported_at = now_ms();
    let summary = match export::export_schedule_bundle(draft, &target, &out_path, exported_at) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "export_failed", format!("{e:#}"), None),
    };
    if let Err(e) = conn.execute(
        "INSERT INTO export_log(id, academic_year_id, session_type, class_id, section, out_path, sha256, assignment_count, exported_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            uuid::Uuid::new_v4().to_string(),
            draft.academic_year_id,
            draft.session_type.as_str(),
            target.class_id,
            target.section,
            out_path.to_string_lossy().to_string(),
            summary.sha256,
            summary.assignment_count as i64,
            exported_at
        ],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    if let Some(wf) = state.workflow.as_mut() {
        wf.mark_exported();
    }
    clear_cache(state);
    ok(
        &req.id,
        json!({
            "applied": true,
            "outPath": out_path.to_string_lossy(),
            "bundleFormat": summary.bundle_format,
            "entryCount": summary.entry_count,
            "assignmentCount": summary.assignment_count,
            "sha256": summary.sha256,
            "state": snapshot(state),
        }),
    )
}

fn handle_export_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut stmt = match conn.prepare(
        "SELECT id, academic_year_id, session_type, class_id, section, out_path, sha256, assignment_count, exported_at
         FROM export_log ORDER BY exported_at DESC, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "academicYearId": r.get::<_, i64>(1)?,
                "sessionType": r.get::<_, String>(2)?,
                "classId": r.get::<_, i64>(3)?,
                "section": r.get::<_, Option<String>>(4)?,
                "outPath": r.get::<_, String>(5)?,
                "sha256": r.get::<_, String>(6)?,
                "assignmentCount": r.get::<_, i64>(7)?,
                "exportedAt": r.get::<_, i64>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(exports) => ok(&req.id, json!({ "exports": exports })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_export_verify(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(in_path) = req.params.get("inPath").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing inPath", None);
    };
    match export::verify_schedule_bundle(std::path::Path::new(in_path)) {
        Ok(schedule) => ok(
            &req.id,
            json!({
                "valid": true,
                "assignmentCount": schedule
                    .get("assignments")
                    .and_then(|a| a.as_array())
                    .map(|a| a.len())
                    .unwrap_or(0),
                "schedule": schedule,
            }),
        ),
        Err(e) => err(&req.id, "bundle_invalid", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "export.write" => Some(handle_export_write(state, req)),
        "export.history" => Some(handle_export_history(state, req)),
        "export.verify" => Some(handle_export_verify(state, req)),
        _ => None,
    }
}
