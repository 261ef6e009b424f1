use crate::auth::{
    check_code, consume_code, hash_password, issue_code, verify_password, CodeCheck, CodePurpose,
};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::students::load_student;
use crate::ipc::helpers::{get_opt_str, get_required_id, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::notify::queue_email;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

pub const MIN_PASSWORD_LEN: usize = 6;

struct Account {
    email: Option<String>,
    is_approved: bool,
    password_hash: Option<String>,
}

fn student_account(conn: &Connection, student_id: &str) -> Result<Option<Account>, HandlerErr> {
    Ok(conn
        .query_row(
            "SELECT email, is_approved, password_hash FROM students WHERE student_id = ?",
            [student_id],
            |r| {
                Ok(Account {
                    email: r.get(0)?,
                    is_approved: r.get::<_, i64>(1)? != 0,
                    password_hash: r.get(2)?,
                })
            },
        )
        .optional()?)
}

fn unauthorized(message: &str) -> HandlerErr {
    HandlerErr::new("unauthorized", message)
}

fn code_error(check: CodeCheck) -> Option<HandlerErr> {
    match check {
        CodeCheck::Valid => None,
        CodeCheck::Missing => Some(HandlerErr::bad_params(
            "No verification code found. Please request a new one.",
        )),
        CodeCheck::Expired => Some(HandlerErr::bad_params(
            "Verification code expired. Please request a new one.",
        )),
        CodeCheck::Mismatch => Some(HandlerErr::bad_params("Invalid verification code.")),
    }
}

/// Reads `password`/`confirmPassword` and checks they agree.
fn new_password(params: &Value) -> Result<String, HandlerErr> {
    let password = get_opt_str(params, "password");
    let confirm = get_opt_str(params, "confirmPassword");
    let (Some(password), Some(confirm)) = (password, confirm) else {
        return Err(HandlerErr::bad_params("All fields are required."));
    };
    if password != confirm {
        return Err(HandlerErr::bad_params("Passwords do not match."));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(HandlerErr::bad_params(format!(
            "Password must be at least {} characters.",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(password)
}

fn auth_login(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let password = get_required_str(params, "password")?;
    let Some(account) = student_account(conn, &student_id)? else {
        return Err(unauthorized("Invalid student ID"));
    };
    if !account.is_approved {
        return Err(HandlerErr::new(
            "forbidden",
            "Account not yet activated, Sign up now",
        ));
    }
    let hash = account.password_hash.unwrap_or_default();
    if !verify_password(&password, &hash) {
        return Err(unauthorized("Incorrect password"));
    }
    tracing::info!(student = %student_id, "student signed in");
    Ok(json!({ "student": load_student(conn, &student_id)? }))
}

fn auth_check_student(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let Some(account) = student_account(conn, &student_id)? else {
        return Err(HandlerErr::not_found("Student ID not found"));
    };
    let Some(email) = account.email.filter(|e| !e.trim().is_empty()) else {
        return Err(HandlerErr::bad_params(
            "No email associated with this student ID",
        ));
    };
    if account.is_approved {
        return Err(HandlerErr::bad_params("This account is already approved"));
    }

    let code = issue_code(conn, CodePurpose::Activation, &student_id)?;
    queue_email(
        conn,
        &email,
        "Account Activation Code",
        &format!(
            "Your verification code is {}. It expires in {} minutes.",
            code,
            CodePurpose::Activation.ttl_secs() / 60
        ),
    )?;
    Ok(json!({ "message": "Verification code sent", "email": email }))
}

fn auth_verify_code(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_opt_str(params, "studentId");
    let code = get_opt_str(params, "code");
    let (Some(student_id), Some(code)) = (student_id, code) else {
        return Err(HandlerErr::bad_params("All fields are required."));
    };
    let password = new_password(params)?;
    if student_account(conn, &student_id)?.is_none() {
        return Err(HandlerErr::not_found("Invalid student ID."));
    }

    let check = check_code(conn, CodePurpose::Activation, &student_id, &code)?;
    if let Some(e) = code_error(check) {
        return Err(e);
    }

    let hash = hash_password(&password)?;
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE students SET password_hash = ?, is_approved = 1 WHERE student_id = ?",
        (&hash, &student_id),
    )?;
    consume_code(&tx, CodePurpose::Activation, &student_id)?;
    tx.commit()?;
    tracing::info!(student = %student_id, "account activated");
    Ok(json!({ "message": "Account activated successfully" }))
}

fn auth_forgot_password(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_id(params, "studentId")?;
    let Some(account) = student_account(conn, &student_id)? else {
        return Err(HandlerErr::not_found("Student ID not found"));
    };
    let Some(email) = account.email.filter(|e| !e.trim().is_empty()) else {
        return Err(HandlerErr::bad_params("No email on record for this student"));
    };

    let code = issue_code(conn, CodePurpose::PasswordReset, &student_id)?;
    queue_email(
        conn,
        &email,
        "Password Reset Code",
        &format!(
            "Use code {} to reset your password. It expires in {} minutes.",
            code,
            CodePurpose::PasswordReset.ttl_secs() / 60
        ),
    )?;
    Ok(json!({ "message": "Password reset code sent", "email": email }))
}

fn auth_reset_password(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_opt_str(params, "studentId");
    let code = get_opt_str(params, "code");
    let (Some(student_id), Some(code)) = (student_id, code) else {
        return Err(HandlerErr::bad_params("All fields are required."));
    };
    let password = new_password(params)?;
    if student_account(conn, &student_id)?.is_none() {
        return Err(HandlerErr::not_found("Invalid student ID."));
    }

    let check = check_code(conn, CodePurpose::PasswordReset, &student_id, &code)?;
    if let Some(e) = code_error(check) {
        return Err(e);
    }

    let hash = hash_password(&password)?;
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE students SET password_hash = ? WHERE student_id = ?",
        (&hash, &student_id),
    )?;
    consume_code(&tx, CodePurpose::PasswordReset, &student_id)?;
    tx.commit()?;
    tracing::info!(student = %student_id, "password reset");
    Ok(json!({ "message": "Password has been reset" }))
}

fn admin_login(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let username = get_required_str(params, "username")?;
    let password = get_required_str(params, "password")?;
    let row: Option<(i64, Option<String>, String)> = conn
        .query_row(
            "SELECT id, email, password_hash FROM admins WHERE username = ?",
            [&username],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((admin_id, email, hash)) = row else {
        return Err(unauthorized("Invalid credentials"));
    };
    if !verify_password(&password, &hash) {
        return Err(unauthorized("Invalid credentials"));
    }

    let Some(email) = email.filter(|e| !e.trim().is_empty()) else {
        return Err(HandlerErr::new(
            "forbidden",
            "No email on record for two-factor sign in",
        ));
    };

    let code = issue_code(conn, CodePurpose::AdminTwoFactor, &admin_id.to_string())?;
    queue_email(
        conn,
        &email,
        "Your Admin Login Code",
        &format!(
            "Your 2FA code is {}. It expires in {} minutes.",
            code,
            CodePurpose::AdminTwoFactor.ttl_secs() / 60
        ),
    )?;
    Ok(json!({ "require2FA": true, "adminId": admin_id }))
}

fn admin_verify_2fa(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let admin_id = get_required_id(params, "adminId")?;
    let code = get_required_str(params, "code")?;
    let check = check_code(conn, CodePurpose::AdminTwoFactor, &admin_id, &code)?;
    if check != CodeCheck::Valid {
        return Err(unauthorized("Invalid or expired 2FA code"));
    }
    let Ok(numeric_id) = admin_id.parse::<i64>() else {
        return Err(unauthorized("Invalid or expired 2FA code"));
    };
    let admin: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, username FROM admins WHERE id = ?",
            [numeric_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((id, username)) = admin else {
        return Err(unauthorized("Invalid or expired 2FA code"));
    };
    consume_code(conn, CodePurpose::AdminTwoFactor, &admin_id)?;
    tracing::info!(admin = %username, "admin signed in");
    Ok(json!({ "admin": { "id": id, "username": username } }))
}

fn admins_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let username = get_required_str(params, "username")?;
    let password = get_required_str(params, "password")?;
    let email = get_required_str(params, "email")?;
    let hash = hash_password(&password)?;
    conn.execute(
        "INSERT INTO admins(username, email, password_hash) VALUES(?, ?, ?)",
        (&username, &email, &hash),
    )?;
    Ok(json!({ "adminId": conn.last_insert_rowid(), "username": username }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "auth.login" => with_db(state, req, |conn, _, p| auth_login(conn, p)),
        "auth.checkStudent" => with_db(state, req, |conn, _, p| auth_check_student(conn, p)),
        "auth.verifyCode" => with_db(state, req, |conn, _, p| auth_verify_code(conn, p)),
        "auth.forgotPassword" => with_db(state, req, |conn, _, p| auth_forgot_password(conn, p)),
        "auth.resetPassword" => with_db(state, req, |conn, _, p| auth_reset_password(conn, p)),
        "admin.login" => with_db(state, req, |conn, _, p| admin_login(conn, p)),
        "admin.verify2fa" => with_db(state, req, |conn, _, p| admin_verify_2fa(conn, p)),
        "admins.create" => with_db(state, req, |conn, _, p| admins_create(conn, p)),
        _ => return None,
    };
    Some(resp)
}
