use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::eligibility::{Attempt, AttemptStatus, StudentStanding};
use crate::terms::TermSettings;

pub const DB_FILE: &str = "enrollment.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS programs(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            department_id INTEGER,
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            student_id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            middle_name TEXT,
            last_name TEXT NOT NULL,
            suffix TEXT,
            email TEXT,
            program_id INTEGER,
            year_level INTEGER NOT NULL DEFAULT 1,
            section TEXT,
            student_status TEXT NOT NULL DEFAULT 'Regular',
            is_approved INTEGER NOT NULL DEFAULT 0,
            is_enrolled INTEGER NOT NULL DEFAULT 0,
            password_hash TEXT,
            created_at TEXT,
            FOREIGN KEY(program_id) REFERENCES programs(id)
        )",
        [],
    )?;
    // Profile columns arrived after the first schema; older workspaces get them added in place.
    ensure_students_profile_columns(&conn)?;
    ensure_students_updated_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_program ON students(program_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_section TEXT NOT NULL UNIQUE,
            subject_code TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            units INTEGER NOT NULL,
            lec_hours INTEGER NOT NULL DEFAULT 0,
            lab_hours INTEGER NOT NULL DEFAULT 0,
            year_level INTEGER NOT NULL,
            semester TEXT NOT NULL,
            program_id INTEGER,
            FOREIGN KEY(program_id) REFERENCES programs(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_term ON subjects(year_level, semester)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_code ON subjects(subject_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS prerequisites(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_code TEXT NOT NULL,
            prereq_subject_code TEXT NOT NULL,
            prereq_type TEXT NOT NULL DEFAULT 'Pre',
            UNIQUE(subject_code, prereq_subject_code)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            semester TEXT NOT NULL,
            enrollment_status INTEGER NOT NULL DEFAULT 0,
            total_units INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(student_id) ON DELETE CASCADE,
            UNIQUE(student_id, academic_year, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_term ON enrollments(academic_year, semester, enrollment_status)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollment_subjects(
            enrollment_id INTEGER NOT NULL,
            subject_section TEXT NOT NULL,
            PRIMARY KEY(enrollment_id, subject_section),
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_history(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id TEXT NOT NULL,
            subject_section TEXT NOT NULL,
            subject_code TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            semester TEXT NOT NULL,
            grade REAL,
            status TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(student_id) ON DELETE CASCADE,
            UNIQUE(student_id, subject_section, academic_year, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_academic_history_student ON academic_history(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_type TEXT NOT NULL,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            type TEXT NOT NULL DEFAULT 'general',
            link TEXT,
            sender_id TEXT,
            sender_type TEXT,
            is_read INTEGER NOT NULL DEFAULT 0,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    ensure_notifications_is_seen(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_type, user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            first_sem_start TEXT NOT NULL,
            first_sem_end TEXT NOT NULL,
            first_sem_enrollment_start TEXT NOT NULL,
            first_sem_enrollment_end TEXT NOT NULL,
            second_sem_start TEXT NOT NULL,
            second_sem_end TEXT NOT NULL,
            second_sem_enrollment_start TEXT NOT NULL,
            second_sem_enrollment_end TEXT NOT NULL,
            summer_start TEXT NOT NULL,
            summer_end TEXT NOT NULL,
            current_academic_year TEXT NOT NULL UNIQUE,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculties(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            department_id INTEGER,
            role TEXT NOT NULL DEFAULT 'grader',
            password_hash TEXT,
            created_at TEXT,
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS admins(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            email TEXT,
            password_hash TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS verification_codes(
            purpose TEXT NOT NULL,
            subject_key TEXT NOT NULL,
            code_hash TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            PRIMARY KEY(purpose, subject_key)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS outbox(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            to_address TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn now_ts() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

const SETTINGS_COLUMNS: &str = "first_sem_start, first_sem_end,
    first_sem_enrollment_start, first_sem_enrollment_end,
    second_sem_start, second_sem_end,
    second_sem_enrollment_start, second_sem_enrollment_end,
    summer_start, summer_end, current_academic_year";

/// Latest settings row (highest id) with its id.
pub fn latest_settings(conn: &Connection) -> rusqlite::Result<Option<(i64, TermSettings)>> {
    let sql = format!(
        "SELECT id, {} FROM settings ORDER BY id DESC LIMIT 1",
        SETTINGS_COLUMNS
    );
    conn.query_row(&sql, [], |r| {
        Ok((
            r.get::<_, i64>(0)?,
            TermSettings {
                first_sem_start: r.get(1)?,
                first_sem_end: r.get(2)?,
                first_sem_enrollment_start: r.get(3)?,
                first_sem_enrollment_end: r.get(4)?,
                second_sem_start: r.get(5)?,
                second_sem_end: r.get(6)?,
                second_sem_enrollment_start: r.get(7)?,
                second_sem_enrollment_end: r.get(8)?,
                summer_start: r.get(9)?,
                summer_end: r.get(10)?,
                current_academic_year: r.get(11)?,
            },
        ))
    })
    .optional()
}

pub fn insert_settings(conn: &Connection, s: &TermSettings) -> rusqlite::Result<i64> {
    let sql = format!(
        "INSERT INTO settings({}, updated_at) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        SETTINGS_COLUMNS
    );
    conn.execute(
        &sql,
        rusqlite::params![
            s.first_sem_start,
            s.first_sem_end,
            s.first_sem_enrollment_start,
            s.first_sem_enrollment_end,
            s.second_sem_start,
            s.second_sem_end,
            s.second_sem_enrollment_start,
            s.second_sem_enrollment_end,
            s.summer_start,
            s.summer_end,
            s.current_academic_year,
            now_ts(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_settings(conn: &Connection, id: i64, s: &TermSettings) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE settings SET
           first_sem_start = ?, first_sem_end = ?,
           first_sem_enrollment_start = ?, first_sem_enrollment_end = ?,
           second_sem_start = ?, second_sem_end = ?,
           second_sem_enrollment_start = ?, second_sem_enrollment_end = ?,
           summer_start = ?, summer_end = ?, current_academic_year = ?,
           updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            s.first_sem_start,
            s.first_sem_end,
            s.first_sem_enrollment_start,
            s.first_sem_enrollment_end,
            s.second_sem_start,
            s.second_sem_end,
            s.second_sem_enrollment_start,
            s.second_sem_enrollment_end,
            s.summer_start,
            s.summer_end,
            s.current_academic_year,
            now_ts(),
            id,
        ],
    )?;
    Ok(())
}

pub fn student_attempts(conn: &Connection, student_id: &str) -> rusqlite::Result<Vec<Attempt>> {
    let mut stmt = conn.prepare(
        "SELECT subject_code, academic_year, status
         FROM academic_history
         WHERE student_id = ?
         ORDER BY academic_year, id",
    )?;
    let rows = stmt
        .query_map([student_id], |r| {
            let code: String = r.get(0)?;
            let year: String = r.get(1)?;
            let status: String = r.get(2)?;
            Ok((code, year, status))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .filter_map(|(subject_code, academic_year, status)| {
            AttemptStatus::parse(&status).map(|status| Attempt {
                subject_code,
                academic_year,
                status,
            })
        })
        .collect())
}

/// Re-derives `student_status` from failed history rows and stores it.
pub fn recompute_student_standing(
    conn: &Connection,
    student_id: &str,
) -> rusqlite::Result<StudentStanding> {
    let failed: i64 = conn.query_row(
        "SELECT COUNT(*) FROM academic_history WHERE student_id = ? AND status = 'Failed'",
        [student_id],
        |r| r.get(0),
    )?;
    let standing = StudentStanding::from_failed_count(failed);
    conn.execute(
        "UPDATE students SET student_status = ?, updated_at = ? WHERE student_id = ?",
        (standing.as_str(), now_ts(), student_id),
    )?;
    Ok(standing)
}

pub const PROFILE_COLUMNS: [&str; 21] = [
    "profile_picture",
    "permanent_address",
    "contact_number",
    "congressional_district",
    "region",
    "gender",
    "birth_date",
    "birthplace",
    "citizenship",
    "religion",
    "civil_status",
    "father_name",
    "father_occupation",
    "father_contact",
    "mother_name",
    "mother_occupation",
    "mother_contact",
    "guardian_name",
    "guardian_relationship",
    "guardian_contact",
    "guardian_email",
];

fn ensure_students_profile_columns(conn: &Connection) -> anyhow::Result<()> {
    for column in PROFILE_COLUMNS {
        if !table_has_column(conn, "students", column)? {
            conn.execute(
                &format!("ALTER TABLE students ADD COLUMN {} TEXT", column),
                [],
            )?;
        }
    }
    Ok(())
}

fn ensure_students_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn ensure_notifications_is_seen(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "notifications", "is_seen")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE notifications ADD COLUMN is_seen INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    // Anything already read has obviously been seen.
    conn.execute("UPDATE notifications SET is_seen = 1 WHERE is_read = 1", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_workspace(tag: &str) -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!(
            "enrolld-db-{}-{}",
            tag,
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn open_is_idempotent_and_adds_profile_columns() {
        let ws = temp_workspace("open");
        drop(open_db(&ws).expect("first open"));
        let conn = open_db(&ws).expect("second open");
        assert!(table_has_column(&conn, "students", "guardian_name").expect("pragma"));
        assert!(table_has_column(&conn, "notifications", "is_seen").expect("pragma"));
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn standing_flips_on_failed_history() {
        let ws = temp_workspace("standing");
        let conn = open_db(&ws).expect("open");
        conn.execute(
            "INSERT INTO students(student_id, first_name, last_name) VALUES('S1', 'Ana', 'Cruz')",
            [],
        )
        .expect("insert student");
        conn.execute(
            "INSERT INTO academic_history(student_id, subject_section, subject_code, academic_year, semester, grade, status)
             VALUES('S1', 'CS101-A', 'CS101', '2024-2025', '1st', 5.0, 'Failed')",
            [],
        )
        .expect("insert history");
        assert_eq!(
            recompute_student_standing(&conn, "S1").expect("recompute"),
            StudentStanding::Irregular
        );
        conn.execute("DELETE FROM academic_history", []).expect("clear");
        assert_eq!(
            recompute_student_standing(&conn, "S1").expect("recompute"),
            StudentStanding::Regular
        );
        let _ = std::fs::remove_dir_all(ws);
    }
}
