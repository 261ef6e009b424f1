//! Password hashing and short-lived verification codes.
//!
//! Passwords use Argon2id in PHC string form. Verification codes are six
//! digits, stored only as a SHA-256 digest bound to their purpose and key.

use anyhow::anyhow;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::Rng;
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodePurpose {
    Activation,
    AdminTwoFactor,
    PasswordReset,
}

impl CodePurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Activation => "activation",
            Self::AdminTwoFactor => "admin_2fa",
            Self::PasswordReset => "password_reset",
        }
    }

    pub fn ttl_secs(self) -> i64 {
        match self {
            Self::Activation | Self::AdminTwoFactor => 5 * 60,
            Self::PasswordReset => 15 * 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeCheck {
    Valid,
    Missing,
    Expired,
    Mismatch,
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow!("failed to hash password: {e}"))
}

/// A malformed stored hash never verifies.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{:06}", n)
}

fn code_digest(purpose: CodePurpose, key: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", purpose.as_str(), key, code.trim()).as_bytes());
    hex::encode(hasher.finalize())
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn sweep_expired(conn: &Connection) -> anyhow::Result<usize> {
    let n = conn.execute(
        "DELETE FROM verification_codes WHERE expires_at < ?",
        [now_secs()],
    )?;
    Ok(n)
}

/// Stores a fresh code for `(purpose, key)`, replacing any earlier one, and returns it.
pub fn issue_code(conn: &Connection, purpose: CodePurpose, key: &str) -> anyhow::Result<String> {
    sweep_expired(conn)?;
    let code = generate_code();
    conn.execute(
        "INSERT INTO verification_codes(purpose, subject_key, code_hash, expires_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(purpose, subject_key) DO UPDATE SET
           code_hash = excluded.code_hash,
           expires_at = excluded.expires_at",
        (
            purpose.as_str(),
            key,
            code_digest(purpose, key, &code),
            now_secs() + purpose.ttl_secs(),
        ),
    )?;
    Ok(code)
}

pub fn check_code(
    conn: &Connection,
    purpose: CodePurpose,
    key: &str,
    code: &str,
) -> anyhow::Result<CodeCheck> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT code_hash, expires_at FROM verification_codes
             WHERE purpose = ? AND subject_key = ?",
            (purpose.as_str(), key),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    // Look first so an expired code is reported as such before the sweep removes it.
    let result = match row {
        None => CodeCheck::Missing,
        Some((_, expires_at)) if expires_at < now_secs() => CodeCheck::Expired,
        Some((hash, _)) if hash != code_digest(purpose, key, code) => CodeCheck::Mismatch,
        Some(_) => CodeCheck::Valid,
    };
    sweep_expired(conn)?;
    Ok(result)
}

pub fn consume_code(conn: &Connection, purpose: CodePurpose, key: &str) -> anyhow::Result<()> {
    conn.execute(
        "DELETE FROM verification_codes WHERE purpose = ? AND subject_key = ?",
        (purpose.as_str(), key),
    )?;
    Ok(())
}
