use crate::auth::{hash_password, verify_password};
use crate::db::now_ts;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_opt_i64, get_opt_str, get_required_i64, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};

pub const DEFAULT_ROLE: &str = "grader";

const FACULTY_SELECT: &str = "SELECT f.id, f.first_name, f.last_name, f.email, f.department_id,
        d.name, f.role, f.created_at
     FROM faculties f
     LEFT JOIN departments d ON d.id = f.department_id";

fn faculty_json(r: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, i64>(0)?,
        "firstName": r.get::<_, String>(1)?,
        "lastName": r.get::<_, String>(2)?,
        "email": r.get::<_, String>(3)?,
        "departmentId": r.get::<_, Option<i64>>(4)?,
        "departmentName": r.get::<_, Option<String>>(5)?,
        "role": r.get::<_, String>(6)?,
        "createdAt": r.get::<_, Option<String>>(7)?,
    }))
}

fn email_taken(conn: &Connection, email: &str, except: Option<i64>) -> Result<bool, HandlerErr> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM faculties WHERE lower(email) = lower(?)",
            [email],
            |r| r.get(0),
        )
        .optional()?;
    Ok(matches!(found, Some(id) if Some(id) != except))
}

fn faculty_list(conn: &Connection) -> Result<Value, HandlerErr> {
    let sql = format!("{} ORDER BY f.last_name, f.first_name", FACULTY_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let faculty = stmt
        .query_map([], faculty_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "faculty": faculty }))
}

fn faculty_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let email = get_required_str(params, "email")?;
    let password = get_required_str(params, "password")?;
    let department_id = get_opt_i64(params, "departmentId")?;
    let role = get_opt_str(params, "role").unwrap_or_else(|| DEFAULT_ROLE.to_string());

    if email_taken(conn, &email, None)? {
        return Err(HandlerErr::bad_params("Email already exists"));
    }
    let hash = hash_password(&password)?;
    conn.execute(
        "INSERT INTO faculties(first_name, last_name, email, department_id, role, password_hash, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &first_name,
            &last_name,
            &email,
            department_id,
            &role,
            &hash,
            now_ts(),
        ),
    )?;
    let id = conn.last_insert_rowid();
    tracing::info!(faculty = id, "faculty account created");
    Ok(json!({ "facultyId": id }))
}

fn faculty_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_i64(params, "facultyId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT id FROM faculties WHERE id = ?", [id], |r| r.get(0))
        .optional()?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("Faculty not found"));
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut bind: Vec<rusqlite::types::Value> = Vec::new();
    for (key, column) in [
        ("firstName", "first_name = ?"),
        ("lastName", "last_name = ?"),
        ("email", "email = ?"),
        ("role", "role = ?"),
    ] {
        if let Some(v) = get_opt_str(params, key) {
            if key == "email" && email_taken(conn, &v, Some(id))? {
                return Err(HandlerErr::bad_params("Email already exists"));
            }
            sets.push(column);
            bind.push(v.into());
        }
    }
    if params.get("departmentId").is_some() {
        sets.push("department_id = ?");
        bind.push(match get_opt_i64(params, "departmentId")? {
            Some(d) => d.into(),
            None => rusqlite::types::Value::Null,
        });
    }
    if let Some(password) = get_opt_str(params, "password") {
        sets.push("password_hash = ?");
        bind.push(hash_password(&password)?.into());
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("No valid fields to update"));
    }

    bind.push(id.into());
    let sql = format!("UPDATE faculties SET {} WHERE id = ?", sets.join(", "));
    conn.execute(&sql, rusqlite::params_from_iter(bind))?;
    Ok(json!({ "facultyId": id, "updated": sets.len() }))
}

fn faculty_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_i64(params, "facultyId")?;
    let n = conn.execute("DELETE FROM faculties WHERE id = ?", [id])?;
    if n == 0 {
        return Err(HandlerErr::not_found("Faculty not found"));
    }
    Ok(json!({ "deleted": true }))
}

/// `username` may be the faculty email or numeric id.
fn faculty_login(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let username = get_required_str(params, "username")?;
    let password = get_required_str(params, "password")?;
    let row: Option<(i64, Option<String>)> = conn
        .query_row(
            "SELECT id, password_hash FROM faculties
             WHERE lower(email) = lower(?1) OR CAST(id AS TEXT) = ?1",
            [&username],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((id, hash)) = row else {
        return Err(HandlerErr::new("unauthorized", "Invalid credentials"));
    };
    let Some(hash) = hash.filter(|h| !h.is_empty()) else {
        return Err(HandlerErr::new(
            "unauthorized",
            "Faculty account requires password setup",
        ));
    };
    if !verify_password(&password, &hash) {
        return Err(HandlerErr::new("unauthorized", "Invalid credentials"));
    }

    let sql = format!("{} WHERE f.id = ?", FACULTY_SELECT);
    let faculty = conn.query_row(&sql, [id], faculty_json)?;
    tracing::info!(faculty = id, "faculty signed in");
    Ok(json!({ "faculty": faculty }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "faculty.list" => with_db(state, req, |conn, _, _| faculty_list(conn)),
        "faculty.create" => with_db(state, req, |conn, _, p| faculty_create(conn, p)),
        "faculty.update" => with_db(state, req, |conn, _, p| faculty_update(conn, p)),
        "faculty.delete" => with_db(state, req, |conn, _, p| faculty_delete(conn, p)),
        "faculty.login" => with_db(state, req, |conn, _, p| faculty_login(conn, p)),
        _ => return None,
    };
    Some(resp)
}
