use crate::eligibility::{PrereqKind, Prerequisite, Semester, SubjectInfo};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_opt_i64, get_required_i64, get_required_semester, get_required_str, with_db,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Value};
use std::collections::HashMap;

fn prerequisites_by_code(conn: &Connection) -> Result<HashMap<String, Vec<(i64, Prerequisite)>>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, subject_code, prereq_subject_code, prereq_type
         FROM prerequisites
         ORDER BY prereq_type DESC, prereq_subject_code",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut out: HashMap<String, Vec<(i64, Prerequisite)>> = HashMap::new();
    for (id, subject_code, code, kind) in rows {
        let kind = PrereqKind::parse(&kind).unwrap_or(PrereqKind::Pre);
        out.entry(subject_code)
            .or_default()
            .push((id, Prerequisite { kind, code }));
    }
    Ok(out)
}

/// Subjects offered to a program (subjects without a program are offered to everyone).
pub(crate) fn load_catalog(
    conn: &Connection,
    program_id: Option<i64>,
) -> Result<Vec<SubjectInfo>, HandlerErr> {
    let prereqs = prerequisites_by_code(conn)?;
    let mut stmt = conn.prepare(
        "SELECT subject_section, subject_code, description, units, year_level, semester
         FROM subjects
         WHERE ?1 IS NULL OR program_id IS NULL OR program_id = ?1
         ORDER BY year_level, semester, subject_section",
    )?;
    let rows = stmt
        .query_map([program_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, String>(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut out = Vec::with_capacity(rows.len());
    for (section, code, description, units, year_level, semester) in rows {
        let Some(semester) = Semester::parse(&semester) else {
            tracing::warn!(%section, %semester, "subject has an unknown semester; skipped");
            continue;
        };
        let prerequisites = prereqs
            .get(&code)
            .map(|v| v.iter().map(|(_, p)| p.clone()).collect())
            .unwrap_or_default();
        out.push(SubjectInfo {
            section,
            code,
            description,
            units,
            year_level,
            semester,
            prerequisites,
        });
    }
    Ok(out)
}

fn parse_prerequisites(params: &Value) -> Result<Vec<Prerequisite>, HandlerErr> {
    let Some(items) = params.get("prerequisites") else {
        return Ok(Vec::new());
    };
    let Some(items) = items.as_array() else {
        return Err(HandlerErr::bad_params("prerequisites must be an array"));
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let code = item
            .get("code")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HandlerErr::bad_params("prerequisite code is required"))?;
        let kind = match item.get("type").and_then(|v| v.as_str()) {
            None => PrereqKind::Pre,
            Some(t) => PrereqKind::parse(t)
                .ok_or_else(|| HandlerErr::bad_params("prerequisite type must be Pre or Co"))?,
        };
        out.push(Prerequisite { kind, code });
    }
    Ok(out)
}

fn replace_prerequisites(
    conn: &Connection,
    subject_code: &str,
    prerequisites: &[Prerequisite],
) -> Result<(), HandlerErr> {
    if prerequisites.iter().any(|p| p.code == subject_code) {
        return Err(HandlerErr::bad_params("a subject cannot require itself"));
    }
    conn.execute(
        "DELETE FROM prerequisites WHERE subject_code = ?",
        [subject_code],
    )?;
    for p in prerequisites {
        conn.execute(
            "INSERT INTO prerequisites(subject_code, prereq_subject_code, prereq_type)
             VALUES(?, ?, ?)
             ON CONFLICT(subject_code, prereq_subject_code) DO UPDATE SET
               prereq_type = excluded.prereq_type",
            (subject_code, &p.code, p.kind.as_str()),
        )?;
    }
    Ok(())
}

struct SubjectInput {
    section: String,
    code: String,
    description: String,
    units: i64,
    lec_hours: i64,
    lab_hours: i64,
    year_level: i64,
    semester: Semester,
    program_id: Option<i64>,
}

fn parse_subject(params: &Value) -> Result<SubjectInput, HandlerErr> {
    let units = get_required_i64(params, "units")?;
    if units < 0 {
        return Err(HandlerErr::bad_params("units must not be negative"));
    }
    let year_level = get_required_i64(params, "yearLevel")?;
    if !(1..=6).contains(&year_level) {
        return Err(HandlerErr::bad_params("yearLevel must be in 1..=6"));
    }
    Ok(SubjectInput {
        section: get_required_str(params, "subjectSection")?,
        code: get_required_str(params, "subjectCode")?,
        description: params
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string(),
        units,
        lec_hours: get_opt_i64(params, "lecHours")?.unwrap_or(0),
        lab_hours: get_opt_i64(params, "labHours")?.unwrap_or(0),
        year_level,
        semester: get_required_semester(params, "semester")?,
        program_id: get_opt_i64(params, "programId")?,
    })
}

fn subjects_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let prereqs = prerequisites_by_code(conn)?;

    let mut sql = String::from(
        "SELECT id, subject_section, subject_code, description, units, lec_hours, lab_hours,
                year_level, semester, program_id
         FROM subjects
         WHERE 1=1",
    );
    let mut bind: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(year) = get_opt_i64(params, "yearLevel")? {
        sql.push_str(" AND year_level = ?");
        bind.push(year.into());
    }
    if let Some(sem) = params.get("semester").and_then(|v| v.as_str()) {
        let sem = Semester::parse(sem)
            .ok_or_else(|| HandlerErr::bad_params("semester must be 1st, 2nd or Summer"))?;
        sql.push_str(" AND semester = ?");
        bind.push(sem.as_str().to_string().into());
    }
    if let Some(program) = get_opt_i64(params, "programId")? {
        sql.push_str(" AND program_id = ?");
        bind.push(program.into());
    }
    sql.push_str(" ORDER BY year_level, semester, subject_section");

    let mut stmt = conn.prepare(&sql)?;
    let subjects = stmt
        .query_map(params_from_iter(bind.iter()), |r| {
            let code: String = r.get(2)?;
            let prerequisites: Vec<Value> = prereqs
                .get(&code)
                .map(|v| {
                    v.iter()
                        .map(|(id, p)| json!({ "id": id, "type": p.kind.as_str(), "code": p.code }))
                        .collect()
                })
                .unwrap_or_default();
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "subjectSection": r.get::<_, String>(1)?,
                "subjectCode": code,
                "description": r.get::<_, String>(3)?,
                "units": r.get::<_, i64>(4)?,
                "lecHours": r.get::<_, i64>(5)?,
                "labHours": r.get::<_, i64>(6)?,
                "yearLevel": r.get::<_, i64>(7)?,
                "semester": r.get::<_, String>(8)?,
                "programId": r.get::<_, Option<i64>>(9)?,
                "prerequisites": prerequisites,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let input = parse_subject(params)?;
    let prerequisites = parse_prerequisites(params)?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO subjects(subject_section, subject_code, description, units, lec_hours,
                              lab_hours, year_level, semester, program_id)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &input.section,
            &input.code,
            &input.description,
            input.units,
            input.lec_hours,
            input.lab_hours,
            input.year_level,
            input.semester.as_str(),
            input.program_id,
        ),
    )?;
    let subject_id = tx.last_insert_rowid();
    if params.get("prerequisites").is_some() {
        replace_prerequisites(&tx, &input.code, &prerequisites)?;
    }
    tx.commit()?;

    Ok(json!({ "subjectId": subject_id, "subjectSection": input.section }))
}

fn subjects_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_i64(params, "id")?;
    let input = parse_subject(params)?;
    let prerequisites = parse_prerequisites(params)?;

    let tx = conn.unchecked_transaction()?;
    let changed = tx.execute(
        "UPDATE subjects SET
           subject_section = ?, subject_code = ?, description = ?, units = ?,
           lec_hours = ?, lab_hours = ?, year_level = ?, semester = ?, program_id = ?
         WHERE id = ?",
        (
            &input.section,
            &input.code,
            &input.description,
            input.units,
            input.lec_hours,
            input.lab_hours,
            input.year_level,
            input.semester.as_str(),
            input.program_id,
            id,
        ),
    )?;
    if changed == 0 {
        return Err(HandlerErr::not_found("Subject not found"));
    }
    replace_prerequisites(&tx, &input.code, &prerequisites)?;
    tx.commit()?;

    Ok(json!({ "ok": true, "prerequisiteCount": prerequisites.len() }))
}

fn subjects_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_i64(params, "id")?;
    let changed = conn.execute("DELETE FROM subjects WHERE id = ?", [id])?;
    if changed == 0 {
        return Err(HandlerErr::not_found("Subject not found"));
    }
    Ok(json!({ "ok": true }))
}

fn prerequisites_add(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let subject_code = get_required_str(params, "subjectCode")?;
    let prereq_code = get_required_str(params, "prereqSubjectCode")?;
    let kind_raw = get_required_str(params, "type")?;
    let kind = PrereqKind::parse(&kind_raw)
        .ok_or_else(|| HandlerErr::bad_params("type must be Pre or Co"))?;
    if subject_code == prereq_code {
        return Err(HandlerErr::bad_params("a subject cannot require itself"));
    }
    conn.execute(
        "INSERT INTO prerequisites(subject_code, prereq_subject_code, prereq_type) VALUES(?, ?, ?)",
        (&subject_code, &prereq_code, kind.as_str()),
    )?;
    Ok(json!({ "prerequisiteId": conn.last_insert_rowid() }))
}

fn prerequisites_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_i64(params, "id")?;
    let changed = conn.execute("DELETE FROM prerequisites WHERE id = ?", [id])?;
    if changed == 0 {
        return Err(HandlerErr::not_found("Prerequisite not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "subjects.list" => with_db(state, req, |conn, _, p| subjects_list(conn, p)),
        "subjects.create" => with_db(state, req, |conn, _, p| subjects_create(conn, p)),
        "subjects.update" => with_db(state, req, |conn, _, p| subjects_update(conn, p)),
        "subjects.delete" => with_db(state, req, |conn, _, p| subjects_delete(conn, p)),
        "subjects.prerequisites.add" => with_db(state, req, |conn, _, p| prerequisites_add(conn, p)),
        "subjects.prerequisites.delete" => {
            with_db(state, req, |conn, _, p| prerequisites_delete(conn, p))
        }
        _ => return None,
    };
    Some(resp)
}
