use crate::events::EventQueue;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_opt_str, get_required_i64, get_required_id, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::notify::{self, Notice};
use rusqlite::Connection;
use serde_json::{json, Value};

pub const LIST_LIMIT: i64 = 50;
const USER_TYPES: [&str; 3] = ["student", "admin", "faculty"];

fn user_type_param(params: &Value) -> Result<String, HandlerErr> {
    let user_type = get_required_str(params, "userType")?;
    if !USER_TYPES.contains(&user_type.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "userType must be one of {}",
            USER_TYPES.join(", ")
        )));
    }
    Ok(user_type)
}

fn notifications_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_type = user_type_param(params)?;
    let user_id = get_required_id(params, "userId")?;
    let mut stmt = conn.prepare(
        "SELECT id, title, message, type, link, sender_id, sender_type, is_read, is_seen, created_at
         FROM notifications
         WHERE user_type = ? AND user_id = ? AND is_deleted = 0
         ORDER BY created_at DESC, id DESC
         LIMIT ?",
    )?;
    let notifications = stmt
        .query_map((&user_type, &user_id, LIST_LIMIT), |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "title": r.get::<_, String>(1)?,
                "message": r.get::<_, String>(2)?,
                "type": r.get::<_, String>(3)?,
                "link": r.get::<_, Option<String>>(4)?,
                "senderId": r.get::<_, Option<String>>(5)?,
                "senderType": r.get::<_, Option<String>>(6)?,
                "isRead": r.get::<_, i64>(7)? != 0,
                "isSeen": r.get::<_, i64>(8)? != 0,
                "createdAt": r.get::<_, String>(9)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    let unseen = notifications
        .iter()
        .filter(|n| n["isSeen"] == json!(false))
        .count();
    Ok(json!({ "notifications": notifications, "unseen": unseen }))
}

fn notifications_create(
    conn: &Connection,
    events: &mut EventQueue,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let user_type = user_type_param(params)?;
    let user_id = get_required_id(params, "userId")?;
    let message = get_required_str(params, "message")?;
    let title = get_opt_str(params, "title").unwrap_or_else(|| "Notification".to_string());
    let kind = get_opt_str(params, "type").unwrap_or_else(|| "general".to_string());
    let link = get_opt_str(params, "link");
    let sender_id = get_opt_str(params, "senderId");
    let sender_type = get_opt_str(params, "senderType").unwrap_or_else(|| "system".to_string());

    let id = notify::send_notification(
        conn,
        events,
        &Notice {
            user_type: &user_type,
            user_id: &user_id,
            title: &title,
            message: &message,
            kind: &kind,
            link: link.as_deref(),
            sender_id: sender_id.as_deref(),
            sender_type: &sender_type,
            email: None,
        },
    )?;
    Ok(json!({ "notificationId": id }))
}

/// Flags one notification; `column` is a fixed name, never caller input.
fn flag(conn: &Connection, params: &Value, column: &str) -> Result<Value, HandlerErr> {
    let id = get_required_i64(params, "notificationId")?;
    let sql = format!(
        "UPDATE notifications SET {} = 1 WHERE id = ? AND is_deleted = 0",
        column
    );
    if conn.execute(&sql, [id])? == 0 {
        return Err(HandlerErr::not_found("Notification not found"));
    }
    Ok(json!({ "notificationId": id }))
}

fn notifications_mark_read(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_i64(params, "notificationId")?;
    // Reading implies having seen it.
    let n = conn.execute(
        "UPDATE notifications SET is_read = 1, is_seen = 1 WHERE id = ? AND is_deleted = 0",
        [id],
    )?;
    if n == 0 {
        return Err(HandlerErr::not_found("Notification not found"));
    }
    Ok(json!({ "notificationId": id }))
}

fn outbox_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let to = get_opt_str(params, "to");
    let mut stmt = conn.prepare(
        "SELECT id, to_address, subject, body, created_at
         FROM outbox
         WHERE ?1 IS NULL OR to_address = ?1
         ORDER BY id",
    )?;
    let messages = stmt
        .query_map([to], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "to": r.get::<_, String>(1)?,
                "subject": r.get::<_, String>(2)?,
                "body": r.get::<_, String>(3)?,
                "createdAt": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "messages": messages }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "notifications.list" => with_db(state, req, |conn, _, p| notifications_list(conn, p)),
        "notifications.create" => with_db(state, req, notifications_create),
        "notifications.markSeen" => with_db(state, req, |conn, _, p| flag(conn, p, "is_seen")),
        "notifications.markRead" => {
            with_db(state, req, |conn, _, p| notifications_mark_read(conn, p))
        }
        "notifications.delete" => with_db(state, req, |conn, _, p| flag(conn, p, "is_deleted")),
        "outbox.list" => with_db(state, req, |conn, _, p| outbox_list(conn, p)),
        _ => return None,
    };
    Some(resp)
}
