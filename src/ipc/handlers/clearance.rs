use crate::events::{self, EventQueue, Target};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::enrollments::{change_status, insert_enrollment, term_enrollment};
use crate::ipc::helpers::{
    get_opt_bool, get_required_id, get_required_semester, get_required_str, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::notify::{self, Notice};
use crate::status::EnrollmentStatus;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

fn clearance_update(
    conn: &Connection,
    events: &mut EventQueue,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let Some(is_cleared) = get_opt_bool(params, "isCleared")? else {
        return Err(HandlerErr::bad_params("missing isCleared"));
    };
    let academic_year = get_required_str(params, "academicYear")?;
    let semester = get_required_semester(params, "semester")?;

    let email: Option<Option<String>> = conn
        .query_row(
            "SELECT email FROM students WHERE student_id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(email) = email else {
        return Err(HandlerErr::not_found("Student not found"));
    };

    let target = if is_cleared {
        EnrollmentStatus::Cleared
    } else {
        EnrollmentStatus::NotCleared
    };

    let tx = conn.unchecked_transaction()?;
    let enrollment_id = match term_enrollment(&tx, &student_id, &academic_year, semester)? {
        Some(row) => {
            let next = row.status.toggle_clearance(is_cleared)?;
            change_status(&tx, events, &row, next)?;
            row.id
        }
        None => insert_enrollment(&tx, &student_id, &academic_year, semester, target, 0)?,
    };

    let message = if is_cleared {
        "Your clearance has been confirmed. You can now proceed to enrollment."
    } else {
        "Your clearance has been revoked."
    };
    notify::send_notification(
        &tx,
        events,
        &Notice {
            user_type: "student",
            user_id: &student_id,
            title: "Clearance Status Updated",
            message,
            kind: "enrollment",
            link: Some("/enroll"),
            sender_id: None,
            sender_type: "admin",
            email: email.as_deref(),
        },
    )?;
    tx.commit()?;

    events.emit(
        events::CLEARANCE_UPDATED,
        Some(Target::student(&student_id)),
        json!({
            "studentId": student_id,
            "enrollmentId": enrollment_id,
            "enrollmentStatus": target.code(),
        }),
    );

    Ok(json!({
        "message": if is_cleared { "Clearance confirmed successfully" } else { "Clearance revoked successfully" },
        "enrollmentId": enrollment_id,
        "enrollmentStatus": target.code(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "clearance.update" => Some(with_db(state, req, clearance_update)),
        _ => None,
    }
}
