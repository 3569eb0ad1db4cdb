mod test_support;

use serde_json::json;
use test_support::{spawn_sidecar, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("timetabled-router-smoke");
    let mut sc = spawn_sidecar();

    let health = sc.request_ok("health", json!({}));
    assert_eq!(health["workspacePath"], json!(null));
    assert_eq!(health["backend"], json!(null));

    // Everything that touches the draft needs a workspace and a context first.
    let no_ws = sc.request("context.set", json!({ "academicYearId": 2025, "sessionType": "morning" }));
    assert_eq!(no_ws["error"]["code"], json!("no_workspace"));
    let no_ctx = sc.request("wizard.state", json!({}));
    assert_eq!(no_ctx["error"]["code"], json!("no_context"));

    sc.request_ok("workspace.select", json!({ "path": workspace.to_string_lossy() }));
    let bad_ctx = sc.request("context.set", json!({ "academicYearId": 2025, "sessionType": "night" }));
    assert_eq!(bad_ctx["error"]["code"], json!("bad_params"));
    let ctx = sc.request_ok("context.set", json!({ "academicYearId": 2025, "sessionType": "evening" }));
    assert_eq!(ctx["changed"], json!(true));
    let same = sc.request_ok("context.set", json!({ "academicYearId": 2025, "sessionType": "evening" }));
    assert_eq!(same["changed"], json!(false));

    let state = sc.request_ok("wizard.state", json!({}));
    assert_eq!(state["currentStep"], json!("filter"));
    assert_eq!(state["sessionType"], json!("evening"));

    // No backend configured yet.
    let no_backend = sc.request(
        "wizard.selectClass",
        json!({ "target": { "gradeLevel": "primary", "gradeNumber": 1, "classId": 1 } }),
    );
    assert_eq!(no_backend["error"]["code"], json!("no_backend"));

    let families = [
        ("generation.status", json!({})),
        ("conflicts.list", json!({})),
        ("export.history", json!({})),
        ("setup.get", json!({})),
        ("visibility.set", json!({ "hidden": true })),
    ];
    for (method, params) in families {
        sc.request_ok(method, params);
    }

    let unknown = sc.request("grades.compute", json!({}));
    assert_eq!(unknown["error"]["code"], json!("not_implemented"));

    sc.send_raw("{not json");
    let bad = sc.read_response();
    assert_eq!(bad["ok"], json!(false));
    assert_eq!(bad["error"]["code"], json!("bad_json"));

    // Still serving after a bad line.
    sc.request_ok("health", json!({}));
    sc.shutdown();
}
