mod test_support;

use serde_json::json;
use test_support::{
    base_fixtures, generated_preview, open_workspace, spawn_sidecar, target, temp_dir,
    walk_to_generate, write_fixture,
};

#[test]
fn draft_survives_a_restart_for_the_same_context() {
    let workspace = temp_dir("timetabled-cache-restart");
    let fixtures = workspace.join("fixtures");
    base_fixtures(&fixtures);
    write_fixture(&fixtures, "generate", generated_preview());

    let mut sc = spawn_sidecar();
    open_workspace(&mut sc, &workspace, &fixtures);
    walk_to_generate(&mut sc);
    sc.run_job("generation.start", json!({}));
    sc.shutdown();

    let mut sc = spawn_sidecar();
    sc.request_ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let restored = sc.request_ok(
        "context.set",
        json!({ "academicYearId": 2025, "sessionType": "morning" }),
    );
    assert_eq!(restored["restored"], json!(true));
    let state = &restored["state"];
    assert_eq!(state["target"], target());
    assert_eq!(state["currentStep"], json!("generate"));
    assert_eq!(state["isPreviewMode"], json!(true));
    assert_eq!(state["assignments"].as_array().map(|a| a.len()), Some(3));
    assert_eq!(state["generationPhase"], json!("previewReady"));

    // A restored preview can be published straight away.
    let health = sc.request_ok("health", json!({}));
    assert!(health["backend"].as_str().unwrap_or("").starts_with("fixture"));

    sc.shutdown();
}

#[test]
fn cached_draft_for_another_year_is_dropped() {
    let workspace = temp_dir("timetabled-cache-year");
    let fixtures = workspace.join("fixtures");
    base_fixtures(&fixtures);

    let mut sc = spawn_sidecar();
    sc.request_ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    sc.request_ok(
        "setup.update",
        json!({
            "section": "backend",
            "patch": { "kind": "fixture", "fixturePath": fixtures.to_string_lossy() }
        }),
    );
    sc.request_ok(
        "context.set",
        json!({ "academicYearId": 2024, "sessionType": "morning" }),
    );
    sc.run_job("wizard.selectClass", json!({ "target": target() }));
    sc.shutdown();

    let mut sc = spawn_sidecar();
    sc.request_ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let switched = sc.request_ok(
        "context.set",
        json!({ "academicYearId": 2025, "sessionType": "morning" }),
    );
    assert_eq!(switched["invalidated"], json!(true));
    assert_eq!(switched["restored"], json!(false));
    assert_eq!(switched["state"]["target"], json!(null));

    // Going back to 2024 finds nothing: the entry was removed, not hidden.
    let back = sc.request_ok(
        "context.storageChanged",
        json!({ "academicYearId": 2024, "sessionType": "morning" }),
    );
    assert_eq!(back["restored"], json!(false));
    assert_eq!(back["state"]["target"], json!(null));

    sc.shutdown();
}

#[test]
fn preview_hidden_too_long_is_discarded() {
    let workspace = temp_dir("timetabled-cache-hidden");
    let fixtures = workspace.join("fixtures");
    base_fixtures(&fixtures);
    write_fixture(&fixtures, "generate", generated_preview());

    let mut sc = spawn_sidecar();
    open_workspace(&mut sc, &workspace, &fixtures);
    walk_to_generate(&mut sc);
    sc.run_job("generation.start", json!({}));
    sc.request_ok("wizard.advance", json!({}));

    let hidden_at: i64 = 1_760_000_000_000;
    sc.request_ok("visibility.set", json!({ "hidden": true, "atMs": hidden_at }));
    let shown = sc.request_ok(
        "visibility.set",
        json!({ "hidden": false, "atMs": hidden_at + 11 * 60 * 1000 }),
    );
    assert_eq!(shown["previewExpired"], json!(true));
    let state = &shown["state"];
    assert_eq!(state["isPreviewMode"], json!(false));
    assert_eq!(state["currentStep"], json!("generate"));
    assert_eq!(state["stepStatus"]["generate"], json!(false));
    assert_eq!(state["assignments"], json!([]));
    assert_eq!(state["generationPhase"], json!("idle"));
    // Parameters are kept so the operator can regenerate.
    assert!(state["generationRequest"].is_object());

    let publish = sc.request_ok("generation.publish", json!({}));
    assert_eq!(publish["reason"], json!("no_preview"));

    sc.shutdown();
}

#[test]
fn short_absence_keeps_the_preview() {
    let workspace = temp_dir("timetabled-cache-short");
    let fixtures = workspace.join("fixtures");
    base_fixtures(&fixtures);
    write_fixture(&fixtures, "generate", generated_preview());

    let mut sc = spawn_sidecar();
    open_workspace(&mut sc, &workspace, &fixtures);
    walk_to_generate(&mut sc);
    sc.run_job("generation.start", json!({}));

    let hidden_at: i64 = 1_760_000_000_000;
    sc.request_ok("visibility.set", json!({ "hidden": true, "atMs": hidden_at }));
    let shown = sc.request_ok(
        "visibility.set",
        json!({ "hidden": false, "atMs": hidden_at + 2 * 60 * 1000 }),
    );
    assert_eq!(shown["previewExpired"], json!(false));
    assert_eq!(shown["state"]["isPreviewMode"], json!(true));

    sc.shutdown();
}

#[test]
fn reset_clears_the_cached_draft() {
    let workspace = temp_dir("timetabled-cache-reset");
    let fixtures = workspace.join("fixtures");
    base_fixtures(&fixtures);

    let mut sc = spawn_sidecar();
    open_workspace(&mut sc, &workspace, &fixtures);
    sc.run_job("wizard.selectClass", json!({ "target": target() }));
    let reset = sc.request_ok("wizard.reset", json!({}));
    assert_eq!(reset["state"]["target"], json!(null));
    assert_eq!(reset["state"]["currentStep"], json!("filter"));
    sc.shutdown();

    let mut sc = spawn_sidecar();
    sc.request_ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let ctx = sc.request_ok(
        "context.set",
        json!({ "academicYearId": 2025, "sessionType": "morning" }),
    );
    assert_eq!(ctx["restored"], json!(false));

    sc.shutdown();
}
