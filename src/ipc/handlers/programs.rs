use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_opt_i64, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::BTreeMap;

fn programs_list(conn: &Connection) -> Result<Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.code, p.name, p.department_id, d.name
         FROM programs p
         LEFT JOIN departments d ON d.id = p.department_id
         ORDER BY p.code",
    )?;
    let programs = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "departmentId": r.get::<_, Option<i64>>(3)?,
                "departmentName": r.get::<_, Option<String>>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "programs": programs }))
}

fn programs_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let code = get_required_str(params, "code")?;
    let name = get_required_str(params, "name")?;
    let department_id = get_opt_i64(params, "departmentId")?;
    if let Some(dept) = department_id {
        let found: Option<i64> = conn
            .query_row("SELECT id FROM departments WHERE id = ?", [dept], |r| r.get(0))
            .optional()?;
        if found.is_none() {
            return Err(HandlerErr::not_found("Department not found"));
        }
    }
    conn.execute(
        "INSERT INTO programs(code, name, department_id) VALUES(?, ?, ?)",
        (&code, &name, department_id),
    )?;
    Ok(json!({ "programId": conn.last_insert_rowid() }))
}

fn departments_list(conn: &Connection) -> Result<Value, HandlerErr> {
    let mut stmt = conn.prepare("SELECT id, code, name FROM departments ORDER BY code")?;
    let departments = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "departments": departments }))
}

fn departments_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let code = get_required_str(params, "code")?;
    let name = get_required_str(params, "name")?;
    conn.execute(
        "INSERT INTO departments(code, name) VALUES(?, ?)",
        (&code, &name),
    )?;
    Ok(json!({ "departmentId": conn.last_insert_rowid() }))
}

/// Departments each carrying their programs; departments without programs are kept.
fn departments_with_programs(conn: &Connection) -> Result<Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT d.id, d.code, d.name, p.id, p.code, p.name
         FROM departments d
         LEFT JOIN programs p ON p.department_id = d.id
         ORDER BY d.code, p.code",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<i64>>(3)?,
                r.get::<_, Option<String>>(4)?,
                r.get::<_, Option<String>>(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut grouped: BTreeMap<String, Value> = BTreeMap::new();
    for (dept_id, dept_code, dept_name, program_id, program_code, program_name) in rows {
        let entry = grouped.entry(dept_code.clone()).or_insert_with(|| {
            json!({ "id": dept_id, "code": dept_code, "name": dept_name, "programs": [] })
        });
        if let (Some(id), Some(code), Some(name)) = (program_id, program_code, program_name) {
            if let Some(list) = entry["programs"].as_array_mut() {
                list.push(json!({ "id": id, "code": code, "name": name }));
            }
        }
    }
    Ok(json!({ "departments": grouped.into_values().collect::<Vec<_>>() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "programs.list" => with_db(state, req, |conn, _, _| programs_list(conn)),
        "programs.create" => with_db(state, req, |conn, _, p| programs_create(conn, p)),
        "departments.list" => with_db(state, req, |conn, _, _| departments_list(conn)),
        "departments.create" => with_db(state, req, |conn, _, p| departments_create(conn, p)),
        "departments.withPrograms" => {
            with_db(state, req, |conn, _, _| departments_with_programs(conn))
        }
        _ => return None,
    };
    Some(resp)
}
