mod test_support;

use serde_json::json;
use test_support::Sidecar;

#[test]
fn notification_lifecycle_for_one_inbox() {
    let mut s = Sidecar::start("enrolld-notifications");

    let first = s.request_ok(
        "notifications.create",
        json!({ "userType": "student", "userId": "2024-0001", "message": "Welcome aboard" }),
    );
    let second = s.request_ok(
        "notifications.create",
        json!({
            "userType": "student",
            "userId": "2024-0001",
            "title": "Reminder",
            "message": "Enrollment closes Friday",
            "type": "enrollment",
            "link": "/enrollment",
            "senderId": "1",
            "senderType": "admin",
        }),
    );
    s.request_ok(
        "notifications.create",
        json!({ "userType": "faculty", "userId": "7", "message": "Other inbox" }),
    );

    let events = s.take_events();
    let pushed: Vec<_> = events
        .iter()
        .filter(|e| e["event"] == "new-notification")
        .collect();
    assert_eq!(pushed.len(), 3);
    assert_eq!(pushed[0]["target"]["userId"], "2024-0001");
    assert_eq!(pushed[0]["payload"]["title"], "Notification");

    let inbox = s.request_ok(
        "notifications.list",
        json!({ "userType": "student", "userId": "2024-0001" }),
    );
    assert_eq!(inbox["unseen"], 2);
    let items = inbox["notifications"].as_array().expect("notifications");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["id"], second["notificationId"]);
    assert_eq!(items[0]["type"], "enrollment");
    assert_eq!(items[0]["senderType"], "admin");
    assert_eq!(items[1]["type"], "general");
    assert_eq!(items[1]["senderType"], "system");

    s.request_ok(
        "notifications.markSeen",
        json!({ "notificationId": first["notificationId"] }),
    );
    s.request_ok(
        "notifications.markRead",
        json!({ "notificationId": second["notificationId"] }),
    );
    let inbox = s.request_ok(
        "notifications.list",
        json!({ "userType": "student", "userId": "2024-0001" }),
    );
    assert_eq!(inbox["unseen"], 0);
    assert_eq!(inbox["notifications"][0]["isRead"], true);
    assert_eq!(inbox["notifications"][1]["isRead"], false);

    s.request_ok(
        "notifications.delete",
        json!({ "notificationId": first["notificationId"] }),
    );
    let inbox = s.request_ok(
        "notifications.list",
        json!({ "userType": "student", "userId": "2024-0001" }),
    );
    assert_eq!(inbox["notifications"].as_array().map(|a| a.len()), Some(1));
    s.request_err(
        "notifications.markRead",
        json!({ "notificationId": first["notificationId"] }),
        "not_found",
    );

    s.request_err(
        "notifications.list",
        json!({ "userType": "parent", "userId": "1" }),
        "bad_params",
    );
    s.request_err(
        "notifications.create",
        json!({ "userType": "student", "userId": "2024-0001" }),
        "bad_params",
    );
}

#[test]
fn settings_report_semester_and_enrollment_window() {
    let mut s = Sidecar::start("enrolld-settings");
    let error = s.request_err("settings.get", json!({}), "not_found");
    assert_eq!(error["message"], "No settings found");

    s.seed_settings("2025-2026");

    let during_first = s.request_ok("settings.get", json!({ "today": "2025-09-10" }));
    assert_eq!(during_first["currentAcademicYear"], "2025-2026");
    assert_eq!(during_first["firstSemStart"], "2025-08-01");
    assert_eq!(during_first["currentSemester"], "1st");
    assert_eq!(during_first["enrollmentOpen"], false);

    let before_term = s.request_ok("settings.get", json!({ "today": "2025-07-10" }));
    assert_eq!(before_term["currentSemester"], "Break");
    assert_eq!(before_term["enrollmentOpen"], true);

    let summer = s.request_ok("settings.get", json!({ "today": "2026-06-10" }));
    assert_eq!(summer["currentSemester"], "Summer");

    let second = s.request_ok("settings.get", json!({ "today": "2026-01-05" }));
    assert_eq!(second["currentSemester"], "Break");
    assert_eq!(second["enrollmentOpen"], true);

    s.request_err("settings.get", json!({ "today": "yesterday" }), "bad_params");
}

#[test]
fn settings_update_validates_and_keeps_one_row() {
    let mut s = Sidecar::start("enrolld-settings-update");
    s.seed_settings("2025-2026");
    let id = s.request_ok("settings.get", json!({}))["id"].clone();

    s.seed_settings("2026-2027");
    let current = s.request_ok("settings.get", json!({}));
    assert_eq!(current["id"], id);
    assert_eq!(current["currentAcademicYear"], "2026-2027");

    let error = s.request_err(
        "settings.update",
        json!({ "currentAcademicYear": "2027-2028" }),
        "bad_params",
    );
    assert!(error["message"].as_str().unwrap_or("").contains("firstSemStart"));

    let mut bad = s.request_ok("settings.get", json!({}));
    bad["summerEnd"] = json!("not-a-date");
    let error = s.request_err("settings.update", bad, "bad_params");
    assert!(error["message"].as_str().unwrap_or("").contains("summerEnd"));

    let mut bad = s.request_ok("settings.get", json!({}));
    bad["currentAcademicYear"] = json!("2026-2030");
    s.request_err("settings.update", bad, "bad_params");
}

#[test]
fn rollover_waits_for_summer_end_and_runs_once() {
    let mut s = Sidecar::start("enrolld-rollover");
    s.request_err("settings.rollover", json!({}), "not_found");
    s.seed_settings("2025-2026");

    let early = s.request_ok("settings.rollover", json!({ "today": "2026-03-01" }));
    assert_eq!(early["created"], false);
    assert_eq!(early["academicYear"], "2025-2026");

    let rolled = s.request_ok("settings.rollover", json!({ "today": "2026-08-01" }));
    assert_eq!(rolled["created"], true);
    assert_eq!(rolled["academicYear"], "2026-2027");
    assert_eq!(rolled["settings"]["firstSemStart"], "2026-08-01");
    assert_eq!(rolled["settings"]["summerEnd"], "2027-07-15");
    assert_eq!(rolled["settings"]["currentSemester"], "1st");

    let current = s.request_ok("settings.get", json!({ "today": "2026-08-01" }));
    assert_eq!(current["currentAcademicYear"], "2026-2027");

    let again = s.request_ok("settings.rollover", json!({ "today": "2026-08-01" }));
    assert_eq!(again["created"], false);
    assert_eq!(again["academicYear"], "2026-2027");
}
