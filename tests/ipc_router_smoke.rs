mod test_support;

use serde_json::json;
use test_support::Sidecar;

#[test]
fn health_and_workspace_gate() {
    let mut s = Sidecar::spawn("enrolld-router-gate");

    let health = s.request_ok("health", json!({}));
    assert_eq!(health["dbOpen"], false);
    assert_eq!(health["workspacePath"], serde_json::Value::Null);
    assert!(health["version"].as_str().is_some());

    let error = s.request_err("students.get", json!({ "studentId": "2024-0001" }), "no_workspace");
    assert_eq!(error["status"], 400);
    s.request_err("workspace.select", json!({}), "bad_params");

    let path = s.workspace.to_string_lossy().to_string();
    s.request_ok("workspace.select", json!({ "path": path }));
    let health = s.request_ok("health", json!({}));
    assert_eq!(health["dbOpen"], true);
    assert_eq!(health["workspacePath"], path);
    assert!(s.workspace.join("enrollment.sqlite3").is_file());
}

#[test]
fn unknown_methods_and_bad_lines() {
    let mut s = Sidecar::start("enrolld-router-errors");

    let error = s.request_err("classes.list", json!({}), "not_implemented");
    assert_eq!(error["status"], 500);

    s.write_raw("{not json");
    let line = s.read_line();
    assert_eq!(line["ok"], false);
    assert_eq!(line["error"]["code"], "bad_json");
    assert_eq!(line["error"]["status"], 400);

    // The daemon keeps serving after a malformed line.
    s.request_ok("health", json!({}));
}

#[test]
fn router_dispatch_covers_handler_families() {
    let mut s = Sidecar::start("enrolld-router-smoke");
    let program = s.seed_program();
    s.seed_student("2024-0001", program, 1);
    s.seed_subject("IT101-A", "IT101", 3, 1, "1st", json!([]));
    s.seed_settings("2025-2026");

    let calls = [
        ("programs.list", json!({})),
        ("departments.list", json!({})),
        ("departments.withPrograms", json!({})),
        ("subjects.list", json!({})),
        ("students.get", json!({ "studentId": "2024-0001" })),
        ("students.academicHistory", json!({ "studentId": "2024-0001" })),
        ("academic.history", json!({ "studentId": "2024-0001" })),
        ("grades.get", json!({ "studentId": "2024-0001" })),
        ("enrollments.status", json!({ "studentId": "2024-0001" })),
        (
            "enrollments.eligibility",
            json!({ "studentId": "2024-0001", "academicYear": "2025-2026", "semester": "1st" }),
        ),
        ("enrollments.unitLoad", json!({ "subjectSections": ["IT101-A"] })),
        ("settings.get", json!({})),
        ("admin.students.list", json!({ "filter": "all" })),
        ("faculty.list", json!({})),
        (
            "notifications.list",
            json!({ "userType": "admin", "userId": "0" }),
        ),
        ("outbox.list", json!({})),
    ];
    for (method, params) in calls {
        s.request_ok(method, params);
    }

    let methods_with_errors = [
        ("auth.login", json!({ "studentId": "x", "password": "y" })),
        ("admin.login", json!({ "username": "x", "password": "y" })),
        ("faculty.login", json!({ "username": "x", "password": "y" })),
        ("clearance.update", json!({})),
        ("enrollments.submit", json!({})),
        ("enrollments.setStatus", json!({})),
        ("admin.enrollments.confirm", json!({})),
        ("backup.import", json!({})),
    ];
    for (method, params) in methods_with_errors {
        let resp = s.request(method, params);
        assert_eq!(resp["ok"], false, "{}", method);
        assert_ne!(resp["error"]["code"], "not_implemented", "{}", method);
    }
}
