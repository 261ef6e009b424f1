use rusqlite::Connection;
use serde_json::json;

use crate::db::now_ts;
use crate::events::{EventQueue, Target, NEW_NOTIFICATION};

pub struct Notice<'a> {
    pub user_type: &'a str,
    pub user_id: &'a str,
    pub title: &'a str,
    pub message: &'a str,
    pub kind: &'a str,
    pub link: Option<&'a str>,
    pub sender_id: Option<&'a str>,
    pub sender_type: &'a str,
    /// Also queue an email to this address.
    pub email: Option<&'a str>,
}

/// Admin notifications go to this shared addressee.
pub const ADMIN_USER_ID: &str = "0";

pub fn queue_email(conn: &Connection, to: &str, subject: &str, body: &str) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO outbox(to_address, subject, body, created_at) VALUES(?, ?, ?, ?)",
        (to, subject, body, now_ts()),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn send_notification(
    conn: &Connection,
    events: &mut EventQueue,
    notice: &Notice<'_>,
) -> rusqlite::Result<i64> {
    let created_at = now_ts();
    conn.execute(
        "INSERT INTO notifications(user_type, user_id, title, message, type, link, sender_id, sender_type, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            notice.user_type,
            notice.user_id,
            notice.title,
            notice.message,
            notice.kind,
            notice.link,
            notice.sender_id,
            notice.sender_type,
            &created_at,
        ),
    )?;
    let id = conn.last_insert_rowid();

    if let Some(to) = notice.email.filter(|e| !e.trim().is_empty()) {
        queue_email(conn, to, notice.title, notice.message)?;
    }

    events.emit(
        NEW_NOTIFICATION,
        Some(Target::user(notice.user_type, notice.user_id)),
        json!({
            "id": id,
            "userType": notice.user_type,
            "userId": notice.user_id,
            "title": notice.title,
            "message": notice.message,
            "type": notice.kind,
            "link": notice.link,
            "senderId": notice.sender_id,
            "senderType": notice.sender_type,
            "createdAt": created_at,
        }),
    );
    Ok(id)
}
