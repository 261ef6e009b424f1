mod test_support;

use serde_json::{json, Value};
use test_support::{temp_dir, Sidecar};

fn ids(list: &Value, key: &str) -> Vec<String> {
    list.as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v[key].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn subject_catalog_and_prerequisites() {
    let mut s = Sidecar::start("enrolld-subjects");
    s.seed_subject("IT101-A", "IT101", 3, 1, "1st", json!([]));
    let it102 = s.seed_subject(
        "IT102-A",
        "IT102",
        3,
        1,
        "2nd",
        json!([{ "code": "IT101" }, { "code": "MATH1", "type": "Co" }]),
    );

    let listed = s.request_ok("subjects.list", json!({ "semester": "2nd" }));
    let subjects = listed["subjects"].as_array().expect("subjects");
    assert_eq!(subjects.len(), 1);
    let prereqs = &subjects[0]["prerequisites"];
    assert_eq!(prereqs.as_array().map(|a| a.len()), Some(2));
    assert_eq!(prereqs[0]["type"], "Pre");
    assert_eq!(prereqs[0]["code"], "IT101");

    let updated = s.request_ok(
        "subjects.update",
        json!({
            "id": it102,
            "subjectSection": "IT102-A",
            "subjectCode": "IT102",
            "description": "Programming 2",
            "units": 4,
            "yearLevel": 1,
            "semester": "2nd",
            "prerequisites": [{ "code": "IT101", "type": "Co" }],
        }),
    );
    assert_eq!(updated["prerequisiteCount"], 1);
    let listed = s.request_ok("subjects.list", json!({ "yearLevel": 1, "semester": "2nd" }));
    let subject = &listed["subjects"][0];
    assert_eq!(subject["units"], 4);
    assert_eq!(subject["description"], "Programming 2");
    assert_eq!(subject["prerequisites"], json!([{ "id": subject["prerequisites"][0]["id"], "type": "Co", "code": "IT101" }]));

    s.request_err(
        "subjects.update",
        json!({
            "id": it102,
            "subjectSection": "IT102-A",
            "subjectCode": "IT102",
            "units": 4,
            "yearLevel": 1,
            "semester": "2nd",
            "prerequisites": [{ "code": "IT102" }],
        }),
        "bad_params",
    );
    s.request_err(
        "subjects.prerequisites.add",
        json!({ "subjectCode": "IT102", "prereqSubjectCode": "IT102", "type": "Pre" }),
        "bad_params",
    );
    let added = s.request_ok(
        "subjects.prerequisites.add",
        json!({ "subjectCode": "IT102", "prereqSubjectCode": "ENG1", "type": "Pre" }),
    );
    s.request_ok(
        "subjects.prerequisites.delete",
        json!({ "id": added["prerequisiteId"] }),
    );
    s.request_err(
        "subjects.prerequisites.delete",
        json!({ "id": added["prerequisiteId"] }),
        "not_found",
    );

    let error = s.request_err(
        "subjects.create",
        json!({
            "subjectSection": "IT101-A",
            "subjectCode": "IT101",
            "units": 3,
            "yearLevel": 1,
            "semester": "1st",
        }),
        "conflict",
    );
    assert_eq!(error["status"], 409);
    s.request_err(
        "subjects.create",
        json!({
            "subjectSection": "IT199-A",
            "subjectCode": "IT199",
            "units": 3,
            "yearLevel": 9,
            "semester": "1st",
        }),
        "bad_params",
    );
    s.request_err(
        "subjects.create",
        json!({
            "subjectSection": "IT199-A",
            "subjectCode": "IT199",
            "units": 3,
            "yearLevel": 1,
            "semester": "3rd",
        }),
        "bad_params",
    );

    s.request_ok("subjects.delete", json!({ "id": it102 }));
    s.request_err("subjects.delete", json!({ "id": it102 }), "not_found");
}

#[test]
fn departments_group_their_programs() {
    let mut s = Sidecar::start("enrolld-departments");
    let program = s.seed_program();
    s.request_ok(
        "departments.create",
        json!({ "code": "CAS", "name": "College of Arts and Sciences" }),
    );
    s.request_err(
        "programs.create",
        json!({ "code": "BSX", "name": "Nowhere", "departmentId": 999 }),
        "not_found",
    );

    let grouped = s.request_ok("departments.withPrograms", json!({}));
    let departments = grouped["departments"].as_array().expect("departments");
    assert_eq!(departments.len(), 2);
    assert_eq!(departments[0]["code"], "CAS");
    assert_eq!(departments[0]["programs"], json!([]));
    assert_eq!(departments[1]["code"], "CCS");
    assert_eq!(departments[1]["programs"][0]["id"], program);
    assert_eq!(departments[1]["programs"][0]["code"], "BSIT");

    let programs = s.request_ok("programs.list", json!({}));
    assert_eq!(programs["programs"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn student_profile_edits_respect_the_view_mode() {
    let mut s = Sidecar::start("enrolld-profile");
    let program = s.seed_program();
    s.seed_student("2024-0001", program, 1);
    s.take_events();

    let res = s.request_ok(
        "students.update",
        json!({
            "studentId": "2024-0001",
            "patch": { "contactNumber": "0917-555-0101", "fatherName": "Jose Dela Cruz" },
        }),
    );
    assert_eq!(res["updatedFields"], 2);
    let events = s.take_events();
    assert!(events.iter().any(|e| e["event"] == "studentUpdated"));

    let error = s.request_err(
        "students.update",
        json!({
            "studentId": "2024-0001",
            "viewMode": "enrollment",
            "patch": { "motherName": "Ana Dela Cruz" },
        }),
        "bad_params",
    );
    assert_eq!(error["message"], "No valid fields to update");

    s.request_ok(
        "students.update",
        json!({
            "studentId": "2024-0001",
            "viewMode": "enrollment",
            "patch": { "region": "NCR", "motherName": "Ana Dela Cruz" },
        }),
    );
    let student = s.request_ok("students.get", json!({ "studentId": "2024-0001" }));
    assert_eq!(student["student"]["contactNumber"], "0917-555-0101");
    assert_eq!(student["student"]["fatherName"], "Jose Dela Cruz");
    assert_eq!(student["student"]["region"], "NCR");
    assert_eq!(student["student"]["motherName"], Value::Null);

    s.request_err(
        "students.update",
        json!({ "studentId": "2024-0001", "patch": { "firstName": "  " } }),
        "bad_params",
    );
    s.request_err(
        "students.update",
        json!({ "studentId": "2024-0001", "viewMode": "audit", "patch": { "region": "X" } }),
        "bad_params",
    );
    s.request_err(
        "students.update",
        json!({ "studentId": "1999-0000", "patch": { "region": "X" } }),
        "not_found",
    );
}

#[test]
fn profile_picture_replaces_the_previous_upload() {
    let mut s = Sidecar::start("enrolld-picture");
    let program = s.seed_program();
    s.seed_student("2024-0001", program, 1);

    let source_dir = temp_dir("enrolld-picture-src");
    let first_src = source_dir.join("me.PNG");
    std::fs::write(&first_src, b"png-one").expect("write picture");
    let second_src = source_dir.join("me2.jpg");
    std::fs::write(&second_src, b"jpg-two").expect("write picture");

    let first = s.request_ok(
        "students.setProfilePicture",
        json!({ "studentId": "2024-0001", "sourcePath": first_src.to_string_lossy() }),
    );
    let first_path = first["filePath"].as_str().expect("filePath").to_string();
    assert!(first_path.starts_with("/uploads/profile_pictures/2024-0001-"));
    assert!(first_path.ends_with(".png"));
    let first_file = s.workspace.join(first_path.trim_start_matches('/'));
    assert_eq!(std::fs::read(&first_file).expect("stored"), b"png-one");

    let second = s.request_ok(
        "students.setProfilePicture",
        json!({ "studentId": "2024-0001", "sourcePath": second_src.to_string_lossy() }),
    );
    let second_path = second["filePath"].as_str().expect("filePath").to_string();
    assert!(!first_file.exists());
    assert!(s.workspace.join(second_path.trim_start_matches('/')).is_file());
    let student = s.request_ok("students.get", json!({ "studentId": "2024-0001" }));
    assert_eq!(student["student"]["profilePicture"], second_path);

    s.request_err(
        "students.setProfilePicture",
        json!({
            "studentId": "2024-0001",
            "sourcePath": source_dir.join("missing.png").to_string_lossy(),
        }),
        "bad_params",
    );
    s.request_err(
        "students.setProfilePicture",
        json!({ "studentId": "1999-0000", "sourcePath": first_src.to_string_lossy() }),
        "not_found",
    );
    let _ = std::fs::remove_dir_all(&source_dir);
}

#[test]
fn profile_picture_name_cannot_escape_the_upload_dir() {
    let mut s = Sidecar::start("enrolld-picture-escape");
    s.request_ok(
        "admin.students.create",
        json!({ "studentId": "../escape", "firstName": "Dot", "lastName": "Dot" }),
    );

    let source_dir = temp_dir("enrolld-picture-escape-src");
    let src = source_dir.join("me.png");
    std::fs::write(&src, b"png").expect("write picture");

    let res = s.request_ok(
        "students.setProfilePicture",
        json!({ "studentId": "../escape", "sourcePath": src.to_string_lossy() }),
    );
    let stored = res["filePath"].as_str().expect("filePath").to_string();
    let name = stored
        .strip_prefix("/uploads/profile_pictures/")
        .expect("stored under the picture dir");
    assert!(!name.contains('/'));
    assert!(!name.contains(".."));

    let pictures = s.workspace.join("uploads").join("profile_pictures");
    let listed: Vec<_> = std::fs::read_dir(&pictures)
        .expect("picture dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(listed, vec![name.to_string()]);
    assert!(!s.workspace.join("uploads").join("escape").exists());
    let _ = std::fs::remove_dir_all(&source_dir);
}

#[test]
fn admin_student_list_filters() {
    let mut s = Sidecar::start("enrolld-admin-list");
    let program = s.seed_program();
    s.seed_student("2024-0001", program, 1);
    s.seed_student("2024-0002", program, 1);
    s.seed_subject("IT101-A", "IT101", 3, 1, "1st", json!([]));

    s.request_ok(
        "admin.students.approve",
        json!({ "studentId": "2024-0001", "academicYear": "2025-2026", "semester": "1st" }),
    );
    s.request_ok(
        "enrollments.submit",
        json!({
            "studentId": "2024-0002",
            "academicYear": "2025-2026",
            "semester": "1st",
            "subjectSections": ["IT101-A"],
        }),
    );

    let all = s.request_ok("admin.students.list", json!({}));
    assert_eq!(all["filter"], "all");
    assert_eq!(ids(&all["students"], "studentId"), vec!["2024-0001", "2024-0002"]);

    let approved = s.request_ok("admin.students.list", json!({ "filter": "approved" }));
    assert_eq!(ids(&approved["students"], "studentId"), vec!["2024-0001"]);
    assert_eq!(approved["students"][0]["enrollmentStatusLabel"], "Not Cleared");

    let pending = s.request_ok("admin.students.list", json!({ "filter": "pending" }));
    assert_eq!(ids(&pending["students"], "studentId"), vec!["2024-0002"]);

    let processing = s.request_ok("admin.students.list", json!({ "filter": "processing" }));
    assert_eq!(ids(&processing["students"], "studentId"), vec!["2024-0002"]);
    assert_eq!(processing["students"][0]["totalUnits"], 3);
    assert_eq!(processing["students"][0]["programName"], "BS Information Technology");

    let enrolled = s.request_ok("admin.students.list", json!({ "filter": "enrolled" }));
    assert_eq!(enrolled["students"], json!([]));
    s.request_err("admin.students.list", json!({ "filter": "late" }), "bad_params");

    let subjects = s.request_ok("admin.students.subjects", json!({ "studentId": "2024-0002" }));
    assert_eq!(ids(&subjects["subjects"], "subjectSection"), vec!["IT101-A"]);
    let empty = s.request_ok("admin.students.subjects", json!({ "studentId": "2024-0001" }));
    assert_eq!(empty["subjects"], json!([]));
    s.request_err(
        "admin.students.subjects",
        json!({ "studentId": "2024-0099" }),
        "not_found",
    );

    s.take_events();
    let updated = s.request_ok(
        "admin.students.update",
        json!({ "studentId": "2024-0002", "patch": { "yearLevel": 2, "studentStatus": "Irregular" } }),
    );
    assert_eq!(updated["student"]["yearLevel"], 2);
    assert_eq!(updated["student"]["studentStatus"], "Irregular");
    assert!(s
        .take_events()
        .iter()
        .any(|e| e["event"] == "studentUpdated"));
    s.request_err(
        "admin.students.update",
        json!({ "studentId": "2024-0002", "patch": { "studentStatus": "Transferee" } }),
        "bad_params",
    );

    s.request_ok("admin.students.delete", json!({ "studentId": "2024-0001" }));
    s.request_err(
        "admin.students.delete",
        json!({ "studentId": "2024-0001" }),
        "not_found",
    );
    let error = s.request_err(
        "admin.students.create",
        json!({ "studentId": "2024-0002", "firstName": "Dup", "lastName": "Licate" }),
        "conflict",
    );
    assert_eq!(error["status"], 409);
}

#[test]
fn workspace_backup_round_trip_over_ipc() {
    let mut s = Sidecar::start("enrolld-backup-ipc");
    let program = s.seed_program();
    s.seed_student("2024-0001", program, 1);

    let bundle_dir = temp_dir("enrolld-backup-ipc-out");
    let bundle = bundle_dir.join("workspace.enrollbackup.zip");
    let exported = s.request_ok(
        "backup.export",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(exported["bundleFormat"], "enrollment-workspace-v1");
    assert!(bundle.is_file());

    s.request_ok("admin.students.delete", json!({ "studentId": "2024-0001" }));
    s.request_err("students.get", json!({ "studentId": "2024-0001" }), "not_found");

    let imported = s.request_ok("backup.import", json!({ "inPath": bundle.to_string_lossy() }));
    assert_eq!(imported["bundleFormatDetected"], "enrollment-workspace-v1");
    let student = s.request_ok("students.get", json!({ "studentId": "2024-0001" }));
    assert_eq!(student["student"]["lastName"], "Dela Cruz");

    s.request_err(
        "backup.import",
        json!({ "inPath": bundle_dir.join("missing.zip").to_string_lossy() }),
        "not_found",
    );
    s.request_err("backup.export", json!({}), "bad_params");
    let _ = std::fs::remove_dir_all(&bundle_dir);
}
