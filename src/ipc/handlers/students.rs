use crate::db::{self, PROFILE_COLUMNS};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_opt_str, get_required_id, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use std::path::Path;

const PICTURE_DIR: &str = "uploads/profile_pictures";

/// Parent columns that only the full profile view may edit.
const PARENT_COLUMNS: [&str; 6] = [
    "father_name",
    "father_occupation",
    "father_contact",
    "mother_name",
    "mother_occupation",
    "mother_contact",
];

const NAME_COLUMNS: [&str; 4] = ["last_name", "first_name", "middle_name", "email"];

pub(crate) fn camel_case(column: &str) -> String {
    let mut out = String::with_capacity(column.len());
    let mut upper = false;
    for ch in column.chars() {
        if ch == '_' {
            upper = true;
        } else if upper {
            out.push(ch.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Full student record (without the password hash), keyed in camelCase.
pub(crate) fn load_student(conn: &Connection, student_id: &str) -> Result<Option<Value>, HandlerErr> {
    let sql = format!(
        "SELECT s.student_id, s.first_name, s.middle_name, s.last_name, s.suffix, s.email,
                s.program_id, p.code, p.name, s.year_level, s.section, s.student_status,
                s.is_approved, s.is_enrolled, s.created_at, s.updated_at, {}
         FROM students s
         LEFT JOIN programs p ON p.id = s.program_id
         WHERE s.student_id = ?",
        PROFILE_COLUMNS
            .iter()
            .map(|c| format!("s.{}", c))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let row = conn
        .query_row(&sql, [student_id], |r| {
            let mut m = Map::new();
            m.insert("studentId".into(), json!(r.get::<_, String>(0)?));
            m.insert("firstName".into(), json!(r.get::<_, String>(1)?));
            m.insert("middleName".into(), json!(r.get::<_, Option<String>>(2)?));
            m.insert("lastName".into(), json!(r.get::<_, String>(3)?));
            m.insert("suffix".into(), json!(r.get::<_, Option<String>>(4)?));
            m.insert("email".into(), json!(r.get::<_, Option<String>>(5)?));
            m.insert("programId".into(), json!(r.get::<_, Option<i64>>(6)?));
            m.insert("programCode".into(), json!(r.get::<_, Option<String>>(7)?));
            m.insert("programName".into(), json!(r.get::<_, Option<String>>(8)?));
            m.insert("yearLevel".into(), json!(r.get::<_, i64>(9)?));
            m.insert("section".into(), json!(r.get::<_, Option<String>>(10)?));
            m.insert("studentStatus".into(), json!(r.get::<_, String>(11)?));
            m.insert("isApproved".into(), json!(r.get::<_, i64>(12)? != 0));
            m.insert("isEnrolled".into(), json!(r.get::<_, i64>(13)? != 0));
            m.insert("createdAt".into(), json!(r.get::<_, Option<String>>(14)?));
            m.insert("updatedAt".into(), json!(r.get::<_, Option<String>>(15)?));
            for (i, col) in PROFILE_COLUMNS.iter().enumerate() {
                m.insert(camel_case(col), json!(r.get::<_, Option<String>>(16 + i)?));
            }
            Ok(Value::Object(m))
        })
        .optional()?;
    Ok(row)
}

pub(crate) fn require_student(conn: &Connection, student_id: &str) -> Result<Value, HandlerErr> {
    load_student(conn, student_id)?.ok_or_else(|| HandlerErr::not_found("Student not found"))
}

fn students_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let student = require_student(conn, &student_id)?;
    Ok(json!({ "student": student }))
}

fn editable_columns(view_mode: &str) -> Result<Vec<&'static str>, HandlerErr> {
    let profile = PROFILE_COLUMNS
        .iter()
        .copied()
        .filter(|c| *c != "profile_picture");
    let cols: Vec<&'static str> = match view_mode {
        "profile" => NAME_COLUMNS.iter().copied().chain(profile).collect(),
        "enrollment" => NAME_COLUMNS
            .iter()
            .copied()
            .chain(profile.filter(|c| !PARENT_COLUMNS.contains(c)))
            .collect(),
        other => {
            return Err(HandlerErr::bad_params(format!(
                "viewMode must be profile or enrollment, got {}",
                other
            )))
        }
    };
    Ok(cols)
}

fn students_update(
    conn: &Connection,
    events: &mut crate::events::EventQueue,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let view_mode = get_opt_str(params, "viewMode").unwrap_or_else(|| "profile".to_string());
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch object"));
    };

    let mut sets = Vec::new();
    let mut bind: Vec<rusqlite::types::Value> = Vec::new();
    for col in editable_columns(&view_mode)? {
        let Some(v) = patch.get(&camel_case(col)) else {
            continue;
        };
        match v {
            Value::Null => bind.push(rusqlite::types::Value::Null),
            Value::String(s) => {
                let s = s.trim();
                if (col == "first_name" || col == "last_name") && s.is_empty() {
                    return Err(HandlerErr::bad_params(format!("{} must not be empty", camel_case(col))));
                }
                bind.push(s.to_string().into());
            }
            _ => {
                return Err(HandlerErr::bad_params(format!(
                    "{} must be a string or null",
                    camel_case(col)
                )))
            }
        }
        sets.push(format!("{} = ?", col));
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("No valid fields to update"));
    }
    sets.push("updated_at = ?".to_string());
    bind.push(db::now_ts().into());
    bind.push(student_id.clone().into());

    let sql = format!("UPDATE students SET {} WHERE student_id = ?", sets.join(", "));
    let changed = conn.execute(&sql, params_from_iter(bind.iter()))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("Student not found"));
    }
    events.emit(
        crate::events::STUDENT_UPDATED,
        Some(crate::events::Target::student(&student_id)),
        json!({ "studentId": student_id }),
    );
    Ok(json!({ "ok": true, "updatedFields": sets.len() - 1 }))
}

fn students_academic_history(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let mut stmt = conn.prepare(
        "SELECT ah.id, ah.subject_section, ah.subject_code, ah.semester, ah.academic_year,
                ah.grade, ah.status, sub.description, sub.units, sub.year_level
         FROM academic_history ah
         LEFT JOIN subjects sub ON sub.subject_section = ah.subject_section
         WHERE ah.student_id = ?
         ORDER BY sub.year_level, ah.semester, ah.academic_year",
    )?;
    let rows = stmt
        .query_map([&student_id], |r| {
            Ok(json!({
                "historyId": r.get::<_, i64>(0)?,
                "subjectSection": r.get::<_, String>(1)?,
                "subjectCode": r.get::<_, String>(2)?,
                "semester": r.get::<_, String>(3)?,
                "academicYear": r.get::<_, String>(4)?,
                "grade": r.get::<_, Option<f64>>(5)?,
                "status": r.get::<_, String>(6)?,
                "description": r.get::<_, Option<String>>(7)?,
                "units": r.get::<_, Option<i64>>(8)?,
                "yearLevel": r.get::<_, Option<i64>>(9)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "history": rows }))
}

/// Registrar view: newest term first, blanks rendered as "-".
fn academic_history(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let mut stmt = conn.prepare(
        "SELECT ah.id, ah.subject_section, ah.subject_code, ah.semester, ah.academic_year,
                ah.grade, ah.status
         FROM academic_history ah
         WHERE ah.student_id = ?
         ORDER BY ah.academic_year DESC, ah.semester DESC, ah.subject_section ASC",
    )?;
    let rows = stmt
        .query_map([&student_id], |r| {
            let grade: Option<f64> = r.get(5)?;
            let status: String = r.get(6)?;
            Ok(json!({
                "historyId": r.get::<_, i64>(0)?,
                "subjectSection": r.get::<_, String>(1)?,
                "subjectCode": r.get::<_, String>(2)?,
                "semester": r.get::<_, String>(3)?,
                "academicYear": r.get::<_, String>(4)?,
                "grade": grade.map(|g| json!(g)).unwrap_or_else(|| json!("-")),
                "status": if status.is_empty() { "-".to_string() } else { status },
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "history": rows }))
}

/// Stored picture name. The student id is reduced to `[A-Za-z0-9-]` so it can
/// never leave `PICTURE_DIR`.
fn picture_file_name(student_id: &str, ext: &str) -> String {
    let id: String = student_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{}-{}{}", id, uuid::Uuid::new_v4(), ext)
}

fn set_profile_picture(
    conn: &Connection,
    workspace: &Path,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let source = get_required_str(params, "sourcePath")?;
    let source = Path::new(&source);
    if !source.is_file() {
        return Err(HandlerErr::bad_params("No file uploaded.")
            .with_details(json!({ "sourcePath": source.to_string_lossy() })));
    }

    let old: Option<Option<String>> = conn
        .query_row(
            "SELECT profile_picture FROM students WHERE student_id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(old) = old else {
        return Err(HandlerErr::not_found("Student not found."));
    };

    let ext = source
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();
    let file_name = picture_file_name(&student_id, &ext);
    let dir = workspace.join(PICTURE_DIR);
    let io_err = |e: std::io::Error| {
        HandlerErr::new("upload_failed", e.to_string())
            .with_details(json!({ "dir": dir.to_string_lossy() }))
    };
    std::fs::create_dir_all(&dir).map_err(io_err)?;
    std::fs::copy(source, dir.join(&file_name)).map_err(io_err)?;

    let stored = format!("/{}/{}", PICTURE_DIR, file_name);
    conn.execute(
        "UPDATE students SET profile_picture = ?, updated_at = ? WHERE student_id = ?",
        (&stored, db::now_ts(), &student_id),
    )?;

    if let Some(old) = old.filter(|o| *o != stored) {
        let old_path = workspace.join(old.trim_start_matches('/'));
        if let Err(e) = std::fs::remove_file(&old_path) {
            tracing::warn!(path = %old_path.display(), "could not delete old picture: {}", e);
        }
    }

    Ok(json!({ "filePath": stored }))
}

fn handle_set_profile_picture(state: &mut AppState, req: &Request) -> Value {
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_ref()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match set_profile_picture(conn, workspace, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "students.get" => with_db(state, req, |conn, _, p| students_get(conn, p)),
        "students.update" => with_db(state, req, students_update),
        "students.academicHistory" => {
            with_db(state, req, |conn, _, p| students_academic_history(conn, p))
        }
        "students.setProfilePicture" => handle_set_profile_picture(state, req),
        "academic.history" => with_db(state, req, |conn, _, p| academic_history(conn, p)),
        _ => return None,
    };
    Some(resp)
}
