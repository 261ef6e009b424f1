use crate::db;
use crate::eligibility::{grade_status, Semester};
use crate::events::{self, EventQueue, Target};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_id, with_db};
use crate::ipc::types::{AppState, Request};
use crate::notify::{self, Notice};
use crate::terms;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashMap;

pub const MIN_GRADE: f64 = 0.0;
pub const MAX_GRADE: f64 = 5.0;

/// `None` for blanks and text that is not a number; those records are skipped.
fn parse_grade(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|g| g.is_finite()),
        _ => None,
    }
}

fn grades_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let program: Option<Option<i64>> = conn
        .query_row(
            "SELECT program_id FROM students WHERE student_id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(program_id) = program else {
        return Err(HandlerErr::not_found("Student not found"));
    };

    // Latest attempt per section wins.
    let mut stmt = conn.prepare(
        "SELECT subject_section, grade, status, academic_year, semester
         FROM academic_history
         WHERE student_id = ?
         ORDER BY academic_year, id",
    )?;
    let attempts: HashMap<String, Value> = stmt
        .query_map([&student_id], |r| {
            let section: String = r.get(0)?;
            Ok((
                section,
                json!({
                    "grade": r.get::<_, Option<f64>>(1)?,
                    "status": r.get::<_, String>(2)?,
                    "academicYear": r.get::<_, String>(3)?,
                    "takenSemester": r.get::<_, String>(4)?,
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())?;

    let mut stmt = conn.prepare(
        "SELECT subject_section, subject_code, description, units, year_level, semester
         FROM subjects
         WHERE ?1 IS NULL OR program_id IS NULL OR program_id = ?1
         ORDER BY year_level, semester, subject_section",
    )?;
    let records = stmt
        .query_map([program_id], |r| {
            let section: String = r.get(0)?;
            let found = attempts.get(&section);
            let pick = |k: &str| found.and_then(|a| a.get(k)).cloned().unwrap_or(Value::Null);
            Ok(json!({
                "subjectSection": section,
                "subjectCode": r.get::<_, String>(1)?,
                "description": r.get::<_, String>(2)?,
                "units": r.get::<_, i64>(3)?,
                "yearLevel": r.get::<_, i64>(4)?,
                "semester": r.get::<_, String>(5)?,
                "grade": pick("grade"),
                "status": pick("status"),
                "academicYear": pick("academicYear"),
                "takenSemester": pick("takenSemester"),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    Ok(json!({ "studentId": student_id, "programId": program_id, "records": records }))
}

fn grades_update(
    conn: &Connection,
    events: &mut EventQueue,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let Some(records) = params.get("records").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("Records must be provided as an array"));
    };

    let email: Option<Option<String>> = conn
        .query_row(
            "SELECT email FROM students WHERE student_id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()?;
    if email.is_none() {
        return Err(HandlerErr::not_found("Student not found"));
    }
    let default_year = db::latest_settings(conn)?.map(|(_, s)| s.current_academic_year);

    let tx = conn.unchecked_transaction()?;
    let mut updated = 0usize;
    let mut skipped = 0usize;
    for rec in records {
        let section = rec
            .get("subjectSection")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HandlerErr::bad_params("each record needs a subjectSection"))?;
        let Some(grade) = parse_grade(rec.get("grade")) else {
            skipped += 1;
            continue;
        };
        if !(MIN_GRADE..=MAX_GRADE).contains(&grade) {
            return Err(HandlerErr::bad_params(format!(
                "grade must be between {} and {}",
                MIN_GRADE, MAX_GRADE
            ))
            .with_details(json!({ "subjectSection": section, "grade": grade })));
        }

        let subject: Option<(String, String)> = tx
            .query_row(
                "SELECT subject_code, semester FROM subjects WHERE subject_section = ?",
                [section],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((subject_code, subject_semester)) = subject else {
            return Err(HandlerErr::bad_params("unknown subject section")
                .with_details(json!({ "subjectSection": section })));
        };

        let academic_year = rec
            .get("academicYear")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| default_year.clone())
            .ok_or_else(|| HandlerErr::bad_params("academicYear missing and no settings saved"))?;
        if let Err(e) = terms::parse_academic_year(&academic_year) {
            return Err(HandlerErr::bad_params(e.to_string()).with_details(
                json!({ "subjectSection": section, "academicYear": academic_year }),
            ));
        }
        let semester = match rec.get("semester").and_then(|v| v.as_str()) {
            Some(s) => Semester::parse(s)
                .ok_or_else(|| HandlerErr::bad_params("semester must be 1st, 2nd or Summer"))?,
            None => Semester::parse(&subject_semester).unwrap_or(Semester::First),
        };

        let status = grade_status(grade);
        tx.execute(
            "INSERT INTO academic_history(student_id, subject_section, subject_code, academic_year,
                                          semester, grade, status, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, subject_section, academic_year, semester) DO UPDATE SET
               grade = excluded.grade,
               status = excluded.status,
               updated_at = excluded.updated_at",
            (
                &student_id,
                section,
                &subject_code,
                &academic_year,
                semester.as_str(),
                grade,
                status.as_str(),
                db::now_ts(),
            ),
        )?;
        updated += 1;
    }

    let standing = db::recompute_student_standing(&tx, &student_id)?;
    notify::send_notification(
        &tx,
        events,
        &Notice {
            user_type: "student",
            user_id: &student_id,
            title: "Grades Updated",
            message: "Your grades have been updated. Please check your academic record.",
            kind: "grade",
            link: Some("/grades"),
            sender_id: None,
            sender_type: "admin",
            email: None,
        },
    )?;
    tx.commit()?;

    tracing::info!(student = %student_id, updated, skipped, standing = standing.as_str(), "grades saved");
    events.emit(
        events::STUDENT_UPDATED,
        Some(Target::student(&student_id)),
        json!({ "studentId": student_id, "studentStatus": standing }),
    );

    Ok(json!({
        "updated": updated,
        "skipped": skipped,
        "studentStatus": standing,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "grades.get" => with_db(state, req, |conn, _, p| grades_get(conn, p)),
        "grades.update" => with_db(state, req, grades_update),
        _ => return None,
    };
    Some(resp)
}
