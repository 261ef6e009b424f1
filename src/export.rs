use anyhow::{anyhow, Context};
use chrono::NaiveDate;
use rusqlite::{params_from_iter, Connection};
use std::path::{Path, PathBuf};

use crate::status::EnrollmentStatus;

pub const UPDATE_BATCH_SIZE: usize = 100;
pub const IRREGULAR_SUBJECT_COLUMNS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportType {
    Regular,
    Irregular,
}

impl ExportType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "regular" => Some(Self::Regular),
            "irregular" => Some(Self::Irregular),
            _ => None,
        }
    }

    fn student_status(self) -> &'static str {
        match self {
            Self::Regular => "Regular",
            Self::Irregular => "Irregular",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Regular => "REGULAR",
            Self::Irregular => "IRREGULAR",
        }
    }
}

pub struct ExportRequest<'a> {
    pub academic_year: &'a str,
    pub semester: Option<&'a str>,
    pub kind: ExportType,
    pub out_dir: &'a Path,
    pub today: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub filename: String,
    pub student_ids: Vec<String>,
}

struct ExportRow {
    enrollment_id: i64,
    student_id: String,
    first_name: String,
    middle_name: Option<String>,
    last_name: String,
    year_level: i64,
    section: Option<String>,
    program_name: Option<String>,
    total_units: i64,
}

pub fn export_filename(req: &ExportRequest<'_>) -> String {
    format!(
        "{}_{}_{}_{}.csv",
        req.today.format("%Y%m%d"),
        req.kind.label(),
        req.academic_year,
        req.semester.unwrap_or("")
    )
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn full_name(row: &ExportRow) -> String {
    format!(
        "{}, {} {}",
        row.last_name,
        row.first_name,
        row.middle_name.as_deref().unwrap_or("")
    )
    .trim()
    .to_string()
}

fn select_rows(conn: &Connection, req: &ExportRequest<'_>) -> anyhow::Result<Vec<ExportRow>> {
    let mut sql = String::from(
        "SELECT e.id, s.student_id, s.first_name, s.middle_name, s.last_name,
                s.year_level, s.section, p.name, e.total_units
         FROM enrollments e
         JOIN students s ON s.student_id = e.student_id
         LEFT JOIN programs p ON p.id = s.program_id
         WHERE e.enrollment_status = ?
           AND e.academic_year = ?
           AND s.student_status = ?",
    );
    let mut bind: Vec<rusqlite::types::Value> = vec![
        EnrollmentStatus::Processing.code().into(),
        req.academic_year.to_string().into(),
        req.kind.student_status().to_string().into(),
    ];
    if req.kind == ExportType::Regular {
        let semester = req
            .semester
            .ok_or_else(|| anyhow!("semester is required for the regular export"))?;
        sql.push_str(" AND e.semester = ?");
        bind.push(semester.to_string().into());
    }
    sql.push_str(" ORDER BY s.last_name, s.first_name, s.student_id");

    let mut stmt = conn.prepare(&sql).context("prepare export query")?;
    let rows = stmt
        .query_map(params_from_iter(bind.iter()), |r| {
            Ok(ExportRow {
                enrollment_id: r.get(0)?,
                student_id: r.get(1)?,
                first_name: r.get(2)?,
                middle_name: r.get(3)?,
                last_name: r.get(4)?,
                year_level: r.get(5)?,
                section: r.get(6)?,
                program_name: r.get(7)?,
                total_units: r.get(8)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .context("run export query")?;
    Ok(rows)
}

fn subject_codes(conn: &Connection, enrollment_id: i64) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT sub.subject_code
         FROM enrollment_subjects es
         JOIN subjects sub ON sub.subject_section = es.subject_section
         WHERE es.enrollment_id = ?
         ORDER BY es.subject_section
         LIMIT 10",
    )?;
    let codes = stmt
        .query_map([enrollment_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(codes)
}

fn render_csv(conn: &Connection, kind: ExportType, rows: &[ExportRow]) -> anyhow::Result<String> {
    let mut header = vec![
        "student_id".to_string(),
        "full_name".to_string(),
        "year_level".to_string(),
        "section".to_string(),
        "program_name".to_string(),
        "total_units".to_string(),
    ];
    if kind == ExportType::Irregular {
        header.extend((1..=IRREGULAR_SUBJECT_COLUMNS).map(|i| format!("s{}", i)));
    }

    let mut out = String::new();
    out.push_str(&header.join(","));
    out.push('\n');

    for row in rows {
        let mut cells = vec![
            csv_quote(&row.student_id),
            csv_quote(&full_name(row)),
            row.year_level.to_string(),
            csv_quote(row.section.as_deref().filter(|s| !s.is_empty()).unwrap_or("-")),
            csv_quote(row.program_name.as_deref().unwrap_or("")),
            row.total_units.to_string(),
        ];
        if kind == ExportType::Irregular {
            let codes = subject_codes(conn, row.enrollment_id)?;
            for i in 0..IRREGULAR_SUBJECT_COLUMNS {
                cells.push(csv_quote(codes.get(i).map(String::as_str).unwrap_or("-")));
            }
        }
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    Ok(out)
}

fn mark_enrolled(conn: &Connection, rows: &[ExportRow]) -> anyhow::Result<()> {
    let ids: Vec<i64> = rows.iter().map(|r| r.enrollment_id).collect();
    for batch in ids.chunks(UPDATE_BATCH_SIZE) {
        let placeholders = vec!["?"; batch.len()].join(", ");
        let sql = format!(
            "UPDATE enrollments SET enrollment_status = {}, updated_at = datetime('now') WHERE id IN ({})",
            EnrollmentStatus::Enrolled.code(),
            placeholders
        );
        conn.execute(&sql, params_from_iter(batch.iter()))
            .context("mark exported enrollments")?;
    }
    for row in rows {
        conn.execute(
            "UPDATE students SET is_enrolled = 1 WHERE student_id = ?",
            [&row.student_id],
        )
        .context("flag exported students")?;
    }
    Ok(())
}

/// Writes the CSV and marks every exported enrollment `Enrolled` in one transaction.
/// On any failure the transaction rolls back and a partially written file is removed.
pub fn export_enrollments_csv(
    conn: &Connection,
    req: &ExportRequest<'_>,
) -> anyhow::Result<ExportSummary> {
    let filename = export_filename(req);
    let path = req.out_dir.join(&filename);

    let tx = conn
        .unchecked_transaction()
        .context("begin export transaction")?;

    let rows = select_rows(&tx, req)?;
    let csv = render_csv(&tx, req.kind, &rows)?;

    std::fs::create_dir_all(req.out_dir).with_context(|| {
        format!("failed to create directory {}", req.out_dir.to_string_lossy())
    })?;
    std::fs::write(&path, csv)
        .with_context(|| format!("failed to write {}", path.to_string_lossy()))?;

    let finish = mark_enrolled(&tx, &rows).and_then(|_| tx.commit().context("commit export"));
    if let Err(e) = finish {
        let _ = std::fs::remove_file(&path);
        return Err(e);
    }

    tracing::info!(
        file = %filename,
        count = rows.len(),
        "exported enrollments and marked them enrolled"
    );
    Ok(ExportSummary {
        path,
        filename,
        student_ids: rows.into_iter().map(|r| r.student_id).collect(),
    })
}
