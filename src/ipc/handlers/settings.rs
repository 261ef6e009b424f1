use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_opt_str, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::terms::{self, TermSettings};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

/// `params.today` pins the clock; otherwise the local date is used.
fn today_param(params: &Value) -> Result<NaiveDate, HandlerErr> {
    match get_opt_str(params, "today") {
        Some(raw) => terms::parse_date(&raw)
            .map_err(|e| HandlerErr::bad_params(format!("today: {e}"))),
        None => Ok(terms::today()),
    }
}

fn settings_json(id: i64, s: &TermSettings, today: NaiveDate) -> Value {
    let mut out = serde_json::to_value(s).unwrap_or_else(|_| json!({}));
    out["id"] = json!(id);
    out["currentSemester"] = json!(terms::determine_semester(s, today).as_str());
    out["enrollmentOpen"] = json!(terms::enrollment_open(s, today));
    out
}

fn settings_from_params(params: &Value) -> Result<TermSettings, HandlerErr> {
    let s = TermSettings {
        first_sem_start: get_required_str(params, "firstSemStart")?,
        first_sem_end: get_required_str(params, "firstSemEnd")?,
        first_sem_enrollment_start: get_required_str(params, "firstSemEnrollmentStart")?,
        first_sem_enrollment_end: get_required_str(params, "firstSemEnrollmentEnd")?,
        second_sem_start: get_required_str(params, "secondSemStart")?,
        second_sem_end: get_required_str(params, "secondSemEnd")?,
        second_sem_enrollment_start: get_required_str(params, "secondSemEnrollmentStart")?,
        second_sem_enrollment_end: get_required_str(params, "secondSemEnrollmentEnd")?,
        summer_start: get_required_str(params, "summerStart")?,
        summer_end: get_required_str(params, "summerEnd")?,
        current_academic_year: get_required_str(params, "currentAcademicYear")?,
    };
    terms::validate(&s).map_err(|e| HandlerErr::bad_params(format!("{e:#}")))?;
    Ok(s)
}

fn settings_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let today = today_param(params)?;
    let Some((id, s)) = db::latest_settings(conn)? else {
        return Err(HandlerErr::not_found("No settings found"));
    };
    Ok(settings_json(id, &s, today))
}

fn settings_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let s = settings_from_params(params)?;
    let id = match db::latest_settings(conn)? {
        Some((id, _)) => {
            db::update_settings(conn, id, &s)?;
            id
        }
        None => db::insert_settings(conn, &s)?,
    };
    tracing::info!(academic_year = %s.current_academic_year, "settings saved");
    Ok(settings_json(id, &s, today_param(params)?))
}

fn settings_rollover(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let today = today_param(params)?;
    let Some((_, current)) = db::latest_settings(conn)? else {
        return Err(HandlerErr::not_found("No settings found"));
    };
    let Some(next) = terms::rollover(&current, today)? else {
        return Ok(json!({
            "created": false,
            "academicYear": current.current_academic_year,
            "reason": "summer term has not ended",
        }));
    };

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM settings WHERE current_academic_year = ?",
            [&next.current_academic_year],
            |r| r.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Ok(json!({
            "created": false,
            "academicYear": next.current_academic_year,
            "reason": "academic year already exists",
        }));
    }

    let id = db::insert_settings(conn, &next)?;
    tracing::info!(academic_year = %next.current_academic_year, "academic year rolled over");
    Ok(json!({
        "created": true,
        "academicYear": next.current_academic_year,
        "settings": settings_json(id, &next, today),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "settings.get" => with_db(state, req, |conn, _, p| settings_get(conn, p)),
        "settings.update" => with_db(state, req, |conn, _, p| settings_update(conn, p)),
        "settings.rollover" => with_db(state, req, |conn, _, p| settings_rollover(conn, p)),
        _ => return None,
    };
    Some(resp)
}
