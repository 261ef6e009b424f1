use crate::db;
use crate::eligibility::{
    self, classify_unit_load, EvalContext, History, Semester, StudentStanding, UnitLoad,
    MAX_UNIT_LOAD, MAX_WITH_OVERLOAD,
};
use crate::events::{self, EventQueue, Target};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::subjects::load_catalog;
use crate::ipc::helpers::{
    get_opt_str, get_required_i64, get_required_id, get_required_semester, get_required_str,
    with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::notify::{self, Notice};
use crate::status::EnrollmentStatus;
use crate::terms::{self, CurrentSemester};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

pub(crate) struct EnrollmentRow {
    pub id: i64,
    pub student_id: String,
    pub academic_year: String,
    pub semester: String,
    pub status: EnrollmentStatus,
}

fn row_from(r: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String, String, String, i64)> {
    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
}

fn into_row(raw: (i64, String, String, String, i64)) -> Result<EnrollmentRow, HandlerErr> {
    let (id, student_id, academic_year, semester, code) = raw;
    Ok(EnrollmentRow {
        id,
        student_id,
        academic_year,
        semester,
        status: EnrollmentStatus::from_code(code)?,
    })
}

pub(crate) fn enrollment_by_id(conn: &Connection, id: i64) -> Result<Option<EnrollmentRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, student_id, academic_year, semester, enrollment_status
         FROM enrollments WHERE id = ?",
        [id],
        row_from,
    )
    .optional()?
    .map(into_row)
    .transpose()
}

pub(crate) fn latest_enrollment(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<EnrollmentRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, student_id, academic_year, semester, enrollment_status
         FROM enrollments WHERE student_id = ?
         ORDER BY id DESC LIMIT 1",
        [student_id],
        row_from,
    )
    .optional()?
    .map(into_row)
    .transpose()
}

pub(crate) fn term_enrollment(
    conn: &Connection,
    student_id: &str,
    academic_year: &str,
    semester: Semester,
) -> Result<Option<EnrollmentRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, student_id, academic_year, semester, enrollment_status
         FROM enrollments
         WHERE student_id = ? AND academic_year = ? AND semester = ?",
        (student_id, academic_year, semester.as_str()),
        row_from,
    )
    .optional()?
    .map(into_row)
    .transpose()
}

pub(crate) fn insert_enrollment(
    conn: &Connection,
    student_id: &str,
    academic_year: &str,
    semester: Semester,
    status: EnrollmentStatus,
    total_units: i64,
) -> Result<i64, HandlerErr> {
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO enrollments(student_id, academic_year, semester, enrollment_status,
                                 total_units, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            student_id,
            academic_year,
            semester.as_str(),
            status.code(),
            total_units,
            &now,
            &now,
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

fn write_status(conn: &Connection, enrollment_id: i64, status: EnrollmentStatus) -> Result<(), HandlerErr> {
    conn.execute(
        "UPDATE enrollments SET enrollment_status = ?, updated_at = ? WHERE id = ?",
        (status.code(), db::now_ts(), enrollment_id),
    )?;
    Ok(())
}

/// Validates and applies a status move, keeping `students.is_enrolled` in step
/// and announcing the change to the student.
pub(crate) fn change_status(
    conn: &Connection,
    events: &mut EventQueue,
    row: &EnrollmentRow,
    to: EnrollmentStatus,
) -> Result<EnrollmentStatus, HandlerErr> {
    let next = row.status.transition(to)?;
    write_status(conn, row.id, next)?;
    conn.execute(
        "UPDATE students SET is_enrolled = ? WHERE student_id = ?",
        (next.marks_enrolled() as i64, &row.student_id),
    )?;
    tracing::info!(
        enrollment = row.id,
        student = %row.student_id,
        from = row.status.code(),
        to = next.code(),
        "enrollment status changed"
    );
    events.emit(
        events::ENROLLMENT_STATUS_UPDATED,
        Some(Target::student(&row.student_id)),
        json!({
            "studentId": row.student_id,
            "enrollmentId": row.id,
            "status": next.code(),
            "statusLabel": next.label(),
        }),
    );
    Ok(next)
}

fn dedupe_sections(raw: &[Value]) -> Result<(Vec<String>, Vec<String>), HandlerErr> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    let mut duplicates = Vec::new();
    for v in raw {
        let s = v
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HandlerErr::bad_params("subjectSections must be non-empty strings"))?;
        if seen.insert(s.clone()) {
            unique.push(s);
        } else if !duplicates.contains(&s) {
            duplicates.push(s);
        }
    }
    Ok((unique, duplicates))
}

/// Units per known section; sections missing from the catalog come back separately.
fn section_units(
    conn: &Connection,
    sections: &[String],
) -> Result<(HashMap<String, i64>, Vec<String>), HandlerErr> {
    if sections.is_empty() {
        return Ok((HashMap::new(), Vec::new()));
    }
    let placeholders = vec!["?"; sections.len()].join(", ");
    let sql = format!(
        "SELECT subject_section, units FROM subjects WHERE subject_section IN ({})",
        placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let known: HashMap<String, i64> = stmt
        .query_map(params_from_iter(sections.iter()), |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())?;
    let unknown = sections
        .iter()
        .filter(|s| !known.contains_key(*s))
        .cloned()
        .collect();
    Ok((known, unknown))
}

fn sections_param(params: &Value) -> Result<(Vec<String>, Vec<String>), HandlerErr> {
    let raw = params
        .get("subjectSections")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("subjectSections must be an array"))?;
    dedupe_sections(raw)
}

fn enrollments_submit(
    conn: &Connection,
    events: &mut EventQueue,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let semester = get_required_semester(params, "semester")?;
    let academic_year = get_required_str(params, "academicYear")?;
    terms::parse_academic_year(&academic_year)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    let (sections, duplicates) = sections_param(params)?;
    if sections.is_empty() {
        return Err(HandlerErr::bad_params("Missing required fields or subjects."));
    }

    let standing: Option<String> = conn
        .query_row(
            "SELECT student_status FROM students WHERE student_id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(standing) = standing else {
        return Err(HandlerErr::not_found("Student not found"));
    };
    let is_regular = StudentStanding::parse(&standing) == Some(StudentStanding::Regular);

    let (units, unknown) = section_units(conn, &sections)?;
    if !unknown.is_empty() {
        return Err(HandlerErr::bad_params("unknown subject sections")
            .with_details(json!({ "unknown": unknown })));
    }
    let total_units: i64 = sections.iter().filter_map(|s| units.get(s)).sum();
    let load = classify_unit_load(total_units);
    if load == UnitLoad::Exceeded {
        return Err(HandlerErr::new(
            "unit_load_exceeded",
            format!(
                "total units {} exceed the maximum of {}",
                total_units, MAX_WITH_OVERLOAD
            ),
        )
        .with_details(json!({ "totalUnits": total_units, "maxUnits": MAX_WITH_OVERLOAD })));
    }

    let tx = conn.unchecked_transaction()?;
    let (enrollment_id, status, created) =
        match term_enrollment(&tx, &student_id, &academic_year, semester)? {
            Some(row) => {
                let next = row.status.transition(EnrollmentStatus::Submitted)?;
                tx.execute(
                    "UPDATE enrollments SET enrollment_status = ?, total_units = ?, updated_at = ?
                     WHERE id = ?",
                    (next.code(), total_units, db::now_ts(), row.id),
                )?;
                tx.execute(
                    "DELETE FROM enrollment_subjects WHERE enrollment_id = ?",
                    [row.id],
                )?;
                (row.id, next, false)
            }
            None => {
                let initial = EnrollmentStatus::initial_for_submission(is_regular);
                let id = insert_enrollment(&tx, &student_id, &academic_year, semester, initial, total_units)?;
                (id, initial, true)
            }
        };
    for section in &sections {
        tx.execute(
            "INSERT INTO enrollment_subjects(enrollment_id, subject_section) VALUES(?, ?)",
            (enrollment_id, section),
        )?;
    }

    let message = format!("Student {} has submitted an enrollment.", student_id);
    notify::send_notification(
        &tx,
        events,
        &Notice {
            user_type: "admin",
            user_id: notify::ADMIN_USER_ID,
            title: "Enrollment",
            message: &message,
            kind: "enrollment",
            link: None,
            sender_id: Some(&student_id),
            sender_type: "student",
            email: None,
        },
    )?;
    tx.commit()?;

    tracing::info!(
        student = %student_id,
        enrollment = enrollment_id,
        units = total_units,
        status = status.code(),
        "enrollment submitted"
    );
    events.emit(
        events::NEW_ENROLLMENT,
        Some(Target::admins()),
        json!({
            "studentId": student_id,
            "enrollmentId": enrollment_id,
            "academicYear": academic_year,
            "semester": semester.as_str(),
            "totalUnits": total_units,
            "status": status.code(),
        }),
    );

    Ok(json!({
        "enrollmentId": enrollment_id,
        "created": created,
        "status": status.code(),
        "statusLabel": status.label(),
        "totalUnits": total_units,
        "unitLoad": load,
        "overload": load == UnitLoad::Overload,
        "subjectsEnrolled": sections,
        "duplicates": duplicates,
    }))
}

fn enrollments_status(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let Some(row) = latest_enrollment(conn, &student_id)? else {
        return Ok(json!({ "step": 0, "enrollmentId": null }));
    };
    Ok(json!({
        "step": row.status.code(),
        "statusLabel": row.status.label(),
        "enrollmentId": row.id,
        "academicYear": row.academic_year,
        "semester": row.semester,
    }))
}

fn enrollments_set_status(
    conn: &Connection,
    events: &mut EventQueue,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let target = EnrollmentStatus::from_code(get_required_i64(params, "status")?)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    let Some(row) = latest_enrollment(conn, &student_id)? else {
        return Err(HandlerErr::not_found("No enrollment record found"));
    };
    let tx = conn.unchecked_transaction()?;
    let next = change_status(&tx, events, &row, target)?;
    tx.commit()?;
    Ok(json!({ "enrollmentId": row.id, "status": next.code(), "statusLabel": next.label() }))
}

fn enrollments_subjects(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let mut stmt = conn.prepare(
        "SELECT es.enrollment_id, es.subject_section, sub.subject_code, sub.description,
                sub.units, sub.year_level, sub.semester, e.academic_year
         FROM enrollment_subjects es
         JOIN enrollments e ON e.id = es.enrollment_id
         JOIN subjects sub ON sub.subject_section = es.subject_section
         WHERE e.student_id = ?
         ORDER BY sub.year_level, sub.semester, es.subject_section",
    )?;
    let rows = stmt
        .query_map([&student_id], |r| {
            Ok(json!({
                "enrollmentId": r.get::<_, i64>(0)?,
                "subjectSection": r.get::<_, String>(1)?,
                "subjectCode": r.get::<_, String>(2)?,
                "description": r.get::<_, String>(3)?,
                "units": r.get::<_, i64>(4)?,
                "yearLevel": r.get::<_, i64>(5)?,
                "semester": r.get::<_, String>(6)?,
                "academicYear": r.get::<_, String>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "subjects": rows }))
}

fn enrollments_grades(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let mut stmt = conn.prepare(
        "SELECT ah.id, ah.subject_section, ah.subject_code, sub.description, ah.academic_year,
                ah.semester, ah.grade, ah.status
         FROM academic_history ah
         JOIN subjects sub ON sub.subject_section = ah.subject_section
         WHERE ah.student_id = ?
         ORDER BY ah.academic_year, ah.semester, ah.subject_section",
    )?;
    let rows = stmt
        .query_map([&student_id], |r| {
            Ok(json!({
                "historyId": r.get::<_, i64>(0)?,
                "subjectSection": r.get::<_, String>(1)?,
                "subjectCode": r.get::<_, String>(2)?,
                "description": r.get::<_, String>(3)?,
                "academicYear": r.get::<_, String>(4)?,
                "semester": r.get::<_, String>(5)?,
                "grade": r.get::<_, Option<f64>>(6)?,
                "status": r.get::<_, String>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "grades": rows }))
}

/// Term to evaluate, with the start year of its academic year. Explicit params
/// win, otherwise the settings row decides.
fn resolve_term(
    conn: &Connection,
    params: &Value,
) -> Result<(String, i32, Semester), HandlerErr> {
    let settings = db::latest_settings(conn)?.map(|(_, s)| s);
    let academic_year = match get_opt_str(params, "academicYear") {
        Some(y) => y,
        None => settings
            .as_ref()
            .map(|s| s.current_academic_year.clone())
            .ok_or_else(|| HandlerErr::bad_params("missing academicYear and no settings saved"))?,
    };
    let (year_start, _) = terms::parse_academic_year(&academic_year)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;

    let semester = if params.get("semester").is_some() {
        get_required_semester(params, "semester")?
    } else {
        let current = settings
            .as_ref()
            .map(|s| terms::determine_semester(s, terms::today()))
            .unwrap_or(CurrentSemester::Unknown);
        match current {
            CurrentSemester::First => Semester::First,
            CurrentSemester::Second => Semester::Second,
            CurrentSemester::Summer => Semester::Summer,
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "missing semester (current term is {})",
                    other.as_str()
                )))
            }
        }
    };
    Ok((academic_year, year_start, semester))
}

fn enrollments_eligibility(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let student: Option<(String, i64, Option<i64>)> = conn
        .query_row(
            "SELECT student_status, year_level, program_id FROM students WHERE student_id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((standing, year_level, program_id)) = student else {
        return Err(HandlerErr::not_found("Student not found"));
    };
    let standing = StudentStanding::parse(&standing).unwrap_or(StudentStanding::Regular);
    let (academic_year, current_year_start, semester) = resolve_term(conn, params)?;

    let catalog = load_catalog(conn, program_id)?;
    let attempts = db::student_attempts(conn, &student_id)?;
    let history = History::from_attempts(&attempts);
    let ctx = EvalContext {
        history: &history,
        catalog: &catalog,
        current_year_start,
    };

    let subjects: Vec<Value> = catalog
        .iter()
        .filter(|s| s.semester == semester)
        .filter(|s| standing == StudentStanding::Irregular || s.year_level == year_level)
        .map(|s| {
            let verdict = eligibility::evaluate(&ctx, s);
            json!({
                "subjectSection": s.section,
                "subjectCode": s.code,
                "description": s.description,
                "units": s.units,
                "yearLevel": s.year_level,
                "semester": s.semester,
                "prerequisites": s.prerequisites,
                "selectable": verdict.is_selectable(),
                "eligibility": verdict,
            })
        })
        .collect();

    Ok(json!({
        "studentId": student_id,
        "studentStatus": standing,
        "academicYear": academic_year,
        "semester": semester,
        "subjects": subjects,
    }))
}

fn enrollments_unit_load(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (sections, duplicates) = sections_param(params)?;
    let (units, unknown) = section_units(conn, &sections)?;
    let total_units: i64 = sections.iter().filter_map(|s| units.get(s)).sum();
    Ok(json!({
        "totalUnits": total_units,
        "unitLoad": classify_unit_load(total_units),
        "maxUnits": MAX_UNIT_LOAD,
        "maxWithOverload": MAX_WITH_OVERLOAD,
        "unknown": unknown,
        "duplicates": duplicates,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "enrollments.submit" => with_db(state, req, enrollments_submit),
        "enrollments.status" => with_db(state, req, |conn, _, p| enrollments_status(conn, p)),
        "enrollments.setStatus" => with_db(state, req, enrollments_set_status),
        "enrollments.subjects" => with_db(state, req, |conn, _, p| enrollments_subjects(conn, p)),
        "enrollments.grades" => with_db(state, req, |conn, _, p| enrollments_grades(conn, p)),
        "enrollments.eligibility" => {
            with_db(state, req, |conn, _, p| enrollments_eligibility(conn, p))
        }
        "enrollments.unitLoad" => with_db(state, req, |conn, _, p| enrollments_unit_load(conn, p)),
        _ => return None,
    };
    Some(resp)
}
