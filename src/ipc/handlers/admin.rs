use crate::db::now_ts;
use crate::eligibility::{Semester, StudentStanding};
use crate::events::{self, EventQueue, Target};
use crate::export::{self, ExportRequest, ExportType};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::enrollments::{
    change_status, enrollment_by_id, insert_enrollment, latest_enrollment, term_enrollment,
};
use crate::ipc::handlers::students::require_student;
use crate::ipc::helpers::{
    get_opt_i64, get_opt_str, get_required_i64, get_required_id, get_required_semester,
    get_required_str, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::notify::{self, Notice};
use crate::status::EnrollmentStatus;
use crate::terms;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Value};
use std::path::PathBuf;

const EXPORTS_DIR: &str = "exports";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StudentFilter {
    All,
    Approved,
    Pending,
    Enrolled,
    Processing,
}

impl StudentFilter {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(Self::All),
            "approved" => Some(Self::Approved),
            "pending" => Some(Self::Pending),
            "enrolled" => Some(Self::Enrolled),
            "processing" => Some(Self::Processing),
            _ => None,
        }
    }

    fn where_clause(self) -> &'static str {
        match self {
            Self::All => "1 = 1",
            Self::Approved => "s.is_approved = 1",
            Self::Pending => "s.is_approved = 0",
            Self::Enrolled => "s.is_enrolled = 1",
            Self::Processing => "le.enrollment_status = 3",
        }
    }
}

fn student_email(conn: &Connection, student_id: &str) -> Result<Option<String>, HandlerErr> {
    let email: Option<Option<String>> = conn
        .query_row(
            "SELECT email FROM students WHERE student_id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()?;
    match email {
        Some(e) => Ok(e),
        None => Err(HandlerErr::not_found("Student not found")),
    }
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let raw = get_opt_str(params, "filter").unwrap_or_else(|| "all".to_string());
    let Some(filter) = StudentFilter::parse(&raw) else {
        return Err(HandlerErr::bad_params(
            "filter must be all, approved, pending, enrolled or processing",
        ));
    };
    let sql = format!(
        "SELECT s.student_id, s.first_name, s.middle_name, s.last_name, s.email, s.year_level,
                s.section, s.student_status, s.is_approved, s.is_enrolled, p.name,
                le.id, le.academic_year, le.semester, le.enrollment_status, le.total_units
         FROM students s
         LEFT JOIN programs p ON p.id = s.program_id
         LEFT JOIN enrollments le ON le.id = (
             SELECT e.id FROM enrollments e WHERE e.student_id = s.student_id
             ORDER BY e.id DESC LIMIT 1
         )
         WHERE {}
         ORDER BY s.last_name, s.first_name, s.student_id",
        filter.where_clause()
    );
    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map([], |r| {
            let status: Option<i64> = r.get(14)?;
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "firstName": r.get::<_, String>(1)?,
                "middleName": r.get::<_, Option<String>>(2)?,
                "lastName": r.get::<_, String>(3)?,
                "email": r.get::<_, Option<String>>(4)?,
                "yearLevel": r.get::<_, i64>(5)?,
                "section": r.get::<_, Option<String>>(6)?,
                "studentStatus": r.get::<_, String>(7)?,
                "isApproved": r.get::<_, i64>(8)? != 0,
                "isEnrolled": r.get::<_, i64>(9)? != 0,
                "programName": r.get::<_, Option<String>>(10)?,
                "enrollmentId": r.get::<_, Option<i64>>(11)?,
                "academicYear": r.get::<_, Option<String>>(12)?,
                "semester": r.get::<_, Option<String>>(13)?,
                "enrollmentStatus": status,
                "enrollmentStatusLabel": status
                    .and_then(|c| EnrollmentStatus::from_code(c).ok())
                    .map(|s| s.label()),
                "totalUnits": r.get::<_, Option<i64>>(15)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "filter": raw, "students": students }))
}

fn standing_param(params: &Value) -> Result<Option<&'static str>, HandlerErr> {
    match get_opt_str(params, "studentStatus") {
        None => Ok(None),
        Some(raw) => StudentStanding::parse(&raw)
            .map(|s| Some(s.as_str()))
            .ok_or_else(|| HandlerErr::bad_params("studentStatus must be Regular or Irregular")),
    }
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let middle_name = get_opt_str(params, "middleName");
    let email = get_opt_str(params, "email");
    let program_id = get_opt_i64(params, "programId")?;
    let year_level = get_opt_i64(params, "yearLevel")?.unwrap_or(1);
    let section = get_opt_str(params, "section");
    let standing = standing_param(params)?.unwrap_or(StudentStanding::Regular.as_str());

    let now = now_ts();
    conn.execute(
        "INSERT INTO students(student_id, first_name, middle_name, last_name, email, program_id,
                              year_level, section, student_status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            student_id,
            first_name,
            middle_name,
            last_name,
            email,
            program_id,
            year_level,
            section,
            standing,
            now,
            now,
        ],
    )?;
    tracing::info!(student = %student_id, "student created");
    Ok(json!({ "student": require_student(conn, &student_id)? }))
}

fn students_update(
    conn: &Connection,
    events: &mut EventQueue,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let Some(patch) = params.get("patch") else {
        return Err(HandlerErr::bad_params("missing patch object"));
    };
    student_email(conn, &student_id)?;

    let mut sets: Vec<&str> = Vec::new();
    let mut bind: Vec<rusqlite::types::Value> = Vec::new();
    for (key, column) in [
        ("firstName", "first_name = ?"),
        ("middleName", "middle_name = ?"),
        ("lastName", "last_name = ?"),
        ("email", "email = ?"),
        ("section", "section = ?"),
    ] {
        if let Some(v) = get_opt_str(patch, key) {
            sets.push(column);
            bind.push(v.into());
        }
    }
    if let Some(year_level) = get_opt_i64(patch, "yearLevel")? {
        sets.push("year_level = ?");
        bind.push(year_level.into());
    }
    if let Some(program_id) = get_opt_i64(patch, "programId")? {
        sets.push("program_id = ?");
        bind.push(program_id.into());
    }
    if let Some(standing) = standing_param(patch)? {
        sets.push("student_status = ?");
        bind.push(standing.to_string().into());
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("No valid fields to update"));
    }
    sets.push("updated_at = ?");
    bind.push(now_ts().into());
    bind.push(student_id.clone().into());

    let sql = format!("UPDATE students SET {} WHERE student_id = ?", sets.join(", "));
    conn.execute(&sql, params_from_iter(bind))?;

    let student = require_student(conn, &student_id)?;
    events.emit(
        events::STUDENT_UPDATED,
        Some(Target::student(&student_id)),
        json!({ "studentId": student_id, "student": student }),
    );
    Ok(json!({ "student": student }))
}

fn students_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let n = conn.execute("DELETE FROM students WHERE student_id = ?", [&student_id])?;
    if n == 0 {
        return Err(HandlerErr::not_found("Student not found"));
    }
    tracing::info!(student = %student_id, "student deleted");
    Ok(json!({ "deleted": true }))
}

fn students_subjects(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let Some(row) = latest_enrollment(conn, &student_id)? else {
        return Err(HandlerErr::not_found("No enrollment found for this student."));
    };
    let mut stmt = conn.prepare(
        "SELECT sub.subject_section, sub.subject_code, sub.description, sub.units,
                sub.lec_hours, sub.lab_hours, sub.year_level, sub.semester
         FROM enrollment_subjects es
         JOIN subjects sub ON sub.subject_section = es.subject_section
         WHERE es.enrollment_id = ?
         ORDER BY sub.subject_section",
    )?;
    let subjects = stmt
        .query_map([row.id], |r| {
            Ok(json!({
                "subjectSection": r.get::<_, String>(0)?,
                "subjectCode": r.get::<_, String>(1)?,
                "description": r.get::<_, String>(2)?,
                "units": r.get::<_, i64>(3)?,
                "lecHours": r.get::<_, i64>(4)?,
                "labHours": r.get::<_, i64>(5)?,
                "yearLevel": r.get::<_, i64>(6)?,
                "semester": r.get::<_, String>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    let total_units: i64 = subjects
        .iter()
        .filter_map(|s| s["units"].as_i64())
        .sum();
    Ok(json!({
        "enrollmentId": row.id,
        "academicYear": row.academic_year,
        "semester": row.semester,
        "status": row.status.code(),
        "statusLabel": row.status.label(),
        "totalUnits": total_units,
        "subjects": subjects,
    }))
}

/// Approves the account and puts the term's enrollment back at the start of the flow.
fn students_approve(
    conn: &Connection,
    events: &mut EventQueue,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let academic_year = get_required_str(params, "academicYear")?;
    let semester = get_required_semester(params, "semester")?;
    let email = student_email(conn, &student_id)?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE students SET is_approved = 1, updated_at = ? WHERE student_id = ?",
        (now_ts(), &student_id),
    )?;
    let (enrollment_id, status) =
        match term_enrollment(&tx, &student_id, &academic_year, semester)? {
            None => {
                let id = insert_enrollment(
                    &tx,
                    &student_id,
                    &academic_year,
                    semester,
                    EnrollmentStatus::NotCleared,
                    0,
                )?;
                (id, EnrollmentStatus::NotCleared)
            }
            Some(row) if row.status == EnrollmentStatus::Cleared => {
                let next = change_status(&tx, events, &row, EnrollmentStatus::NotCleared)?;
                (row.id, next)
            }
            Some(row) => (row.id, row.status),
        };

    notify::send_notification(
        &tx,
        events,
        &Notice {
            user_type: "student",
            user_id: &student_id,
            title: "Enrollment Approved",
            message: "Your account has been approved. You may now proceed with your enrollment.",
            kind: "enrollment",
            link: Some("/enroll"),
            sender_id: None,
            sender_type: "admin",
            email: email.as_deref(),
        },
    )?;
    tx.commit()?;
    tracing::info!(student = %student_id, enrollment = enrollment_id, "student approved");

    Ok(json!({
        "studentId": student_id,
        "enrollmentId": enrollment_id,
        "status": status.code(),
        "statusLabel": status.label(),
    }))
}

fn move_enrollment(
    conn: &Connection,
    events: &mut EventQueue,
    params: &Value,
    to: EnrollmentStatus,
) -> Result<Value, HandlerErr> {
    let enrollment_id = get_required_i64(params, "enrollmentId")?;
    let Some(row) = enrollment_by_id(conn, enrollment_id)? else {
        return Err(HandlerErr::not_found("Enrollment not found"));
    };
    let email = student_email(conn, &row.student_id)?;

    let (title, message) = if to == EnrollmentStatus::Processing {
        (
            "Enrollment Confirmed",
            "Your enrollment has been confirmed and is now being processed.",
        )
    } else {
        (
            "Enrollment Revoked",
            "Your enrollment has been returned for review. Please check your subjects.",
        )
    };

    let tx = conn.unchecked_transaction()?;
    let next = change_status(&tx, events, &row, to)?;
    notify::send_notification(
        &tx,
        events,
        &Notice {
            user_type: "student",
            user_id: &row.student_id,
            title,
            message,
            kind: "enrollment",
            link: Some("/enroll"),
            sender_id: None,
            sender_type: "admin",
            email: email.as_deref(),
        },
    )?;
    tx.commit()?;

    Ok(json!({
        "enrollmentId": row.id,
        "studentId": row.student_id,
        "status": next.code(),
        "statusLabel": next.label(),
    }))
}

fn enrollments_export_csv(
    conn: &Connection,
    events: &mut EventQueue,
    params: &Value,
    workspace: Option<PathBuf>,
) -> Result<Value, HandlerErr> {
    let academic_year = get_required_str(params, "academicYear")?;
    terms::parse_academic_year(&academic_year)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    let raw_type = get_required_str(params, "type")?;
    let Some(kind) = ExportType::parse(&raw_type) else {
        return Err(HandlerErr::bad_params("type must be regular or irregular"));
    };
    let semester = match get_opt_str(params, "semester") {
        Some(s) => Some(
            Semester::parse(&s)
                .ok_or_else(|| HandlerErr::bad_params("semester must be 1st, 2nd or Summer"))?,
        ),
        None => None,
    };
    if kind == ExportType::Regular && semester.is_none() {
        return Err(HandlerErr::bad_params("semester is required for the regular export"));
    }
    let out_dir = match get_opt_str(params, "outDir") {
        Some(dir) => PathBuf::from(dir),
        None => workspace
            .map(|w| w.join(EXPORTS_DIR))
            .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?,
    };

    let req = ExportRequest {
        academic_year: &academic_year,
        semester: semester.map(|s| s.as_str()),
        kind,
        out_dir: &out_dir,
        today: terms::today(),
    };
    let summary = export::export_enrollments_csv(conn, &req)
        .map_err(|e| HandlerErr::new("export_failed", format!("{e:#}")))?;

    for student_id in &summary.student_ids {
        events.emit(
            events::ENROLLMENT_STATUS_UPDATED,
            Some(Target::student(student_id)),
            json!({
                "studentId": student_id,
                "status": EnrollmentStatus::Enrolled.code(),
                "statusLabel": EnrollmentStatus::Enrolled.label(),
            }),
        );
    }

    Ok(json!({
        "filename": summary.filename,
        "path": summary.path.to_string_lossy(),
        "count": summary.student_ids.len(),
        "studentIds": summary.student_ids,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "admin.students.list" => with_db(state, req, |conn, _, p| students_list(conn, p)),
        "admin.students.create" => with_db(state, req, |conn, _, p| students_create(conn, p)),
        "admin.students.update" => with_db(state, req, students_update),
        "admin.students.delete" => with_db(state, req, |conn, _, p| students_delete(conn, p)),
        "admin.students.subjects" => with_db(state, req, |conn, _, p| students_subjects(conn, p)),
        "admin.students.approve" => with_db(state, req, students_approve),
        "admin.enrollments.confirm" => with_db(state, req, |conn, events, p| {
            move_enrollment(conn, events, p, EnrollmentStatus::Processing)
        }),
        "admin.enrollments.revoke" => with_db(state, req, |conn, events, p| {
            move_enrollment(conn, events, p, EnrollmentStatus::Cleared)
        }),
        "admin.enrollments.exportCsv" => {
            let workspace = state.workspace.clone();
            with_db(state, req, |conn, events, p| {
                enrollments_export_csv(conn, events, p, workspace)
            })
        }
        _ => return None,
    };
    Some(resp)
}
