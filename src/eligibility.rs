use serde::Serialize;
use std::collections::{HashMap, HashSet};

pub const MAX_UNIT_LOAD: i64 = 25;
pub const MAX_WITH_OVERLOAD: i64 = 27;
pub const MAX_RETAKE_ATTEMPTS: usize = 3;
pub const RETAKE_WINDOW_YEARS: i32 = 6;
pub const PASSING_GRADE: f64 = 3.0;

/// Prerequisite code that stands for "previous term completed" rather than a course.
pub const YEAR_STANDING_CODE: &str = "YEAR_STANDING";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Semester {
    #[serde(rename = "1st")]
    First,
    #[serde(rename = "2nd")]
    Second,
    Summer,
}

impl Semester {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1st" | "1" | "first" => Some(Self::First),
            "2nd" | "2" | "second" => Some(Self::Second),
            "summer" => Some(Self::Summer),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::First => "1st",
            Self::Second => "2nd",
            Self::Summer => "Summer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PrereqKind {
    Pre,
    Co,
}

impl PrereqKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "Pre" | "pre" | "PRE" => Some(Self::Pre),
            "Co" | "co" | "CO" => Some(Self::Co),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pre => "Pre",
            Self::Co => "Co",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prerequisite {
    #[serde(rename = "type")]
    pub kind: PrereqKind,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct SubjectInfo {
    pub section: String,
    pub code: String,
    pub description: String,
    pub units: i64,
    pub year_level: i64,
    pub semester: Semester,
    pub prerequisites: Vec<Prerequisite>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttemptStatus {
    Passed,
    Failed,
    #[serde(rename = "INC")]
    Incomplete,
}

impl AttemptStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            "inc" => Some(Self::Incomplete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "Passed",
            Self::Failed => "Failed",
            Self::Incomplete => "INC",
        }
    }
}

/// `0` is recorded as incomplete; anything at or under 3.0 passes.
pub fn grade_status(grade: f64) -> AttemptStatus {
    if grade == 0.0 {
        AttemptStatus::Incomplete
    } else if grade <= PASSING_GRADE {
        AttemptStatus::Passed
    } else {
        AttemptStatus::Failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StudentStanding {
    Regular,
    Irregular,
}

impl StudentStanding {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "regular" => Some(Self::Regular),
            "irregular" => Some(Self::Irregular),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "Regular",
            Self::Irregular => "Irregular",
        }
    }

    pub fn from_failed_count(failed: i64) -> Self {
        if failed > 0 {
            Self::Irregular
        } else {
            Self::Regular
        }
    }
}

/// Start year of an academic year label such as `2025-2026`.
pub fn academic_year_start(label: &str) -> Option<i32> {
    label.split('-').next()?.trim().parse::<i32>().ok()
}

#[derive(Debug, Clone)]
pub struct Attempt {
    pub subject_code: String,
    pub academic_year: String,
    pub status: AttemptStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailRecord {
    pub attempts: usize,
    pub first_year: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct History {
    passed: HashSet<String>,
    failed: HashMap<String, FailRecord>,
}

impl History {
    pub fn from_attempts<'a, I>(attempts: I) -> Self
    where
        I: IntoIterator<Item = &'a Attempt>,
    {
        let mut out = History::default();
        for a in attempts {
            match a.status {
                AttemptStatus::Passed => {
                    out.passed.insert(a.subject_code.clone());
                }
                AttemptStatus::Failed => {
                    let year = academic_year_start(&a.academic_year);
                    let rec = out.failed.entry(a.subject_code.clone()).or_insert(FailRecord {
                        attempts: 0,
                        first_year: None,
                    });
                    rec.attempts += 1;
                    rec.first_year = match (rec.first_year, year) {
                        (Some(cur), Some(y)) => Some(cur.min(y)),
                        (None, y) => y,
                        (cur, None) => cur,
                    };
                }
                AttemptStatus::Incomplete => {}
            }
        }
        out
    }

    pub fn has_passed(&self, code: &str) -> bool {
        self.passed.contains(code)
    }

    pub fn failures(&self, code: &str) -> Option<FailRecord> {
        self.failed.get(code).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Eligibility {
    Eligible,
    Passed,
    Retake,
    Blocked {
        reason: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        unmet: Vec<String>,
    },
}

impl Eligibility {
    pub fn is_selectable(&self) -> bool {
        matches!(self, Eligibility::Eligible | Eligibility::Retake)
    }
}

pub struct EvalContext<'a> {
    pub history: &'a History,
    /// Every subject the student could be measured against for year standing.
    pub catalog: &'a [SubjectInfo],
    pub current_year_start: i32,
}

pub fn can_retake(rec: FailRecord, current_year_start: i32) -> bool {
    if rec.attempts >= MAX_RETAKE_ATTEMPTS {
        return false;
    }
    match rec.first_year {
        Some(first) => current_year_start - first <= RETAKE_WINDOW_YEARS,
        None => true,
    }
}

fn previous_term(year_level: i64, semester: Semester) -> Option<(i64, Semester)> {
    match semester {
        Semester::First if year_level > 1 => Some((year_level - 1, Semester::Second)),
        Semester::First => None,
        Semester::Second => Some((year_level, Semester::First)),
        Semester::Summer => Some((year_level, Semester::Second)),
    }
}

fn needs_year_standing(subject: &SubjectInfo) -> bool {
    (subject.year_level == 2 && subject.semester == Semester::Second)
        || subject
            .prerequisites
            .iter()
            .any(|p| p.code == YEAR_STANDING_CODE)
}

fn year_standing_met(ctx: &EvalContext<'_>, subject: &SubjectInfo) -> bool {
    let Some((year, sem)) = previous_term(subject.year_level, subject.semester) else {
        return true;
    };
    ctx.catalog
        .iter()
        .filter(|s| s.year_level == year && s.semester == sem)
        .all(|s| ctx.history.has_passed(&s.code))
}

pub fn evaluate(ctx: &EvalContext<'_>, subject: &SubjectInfo) -> Eligibility {
    if ctx.history.has_passed(&subject.code) {
        return Eligibility::Passed;
    }

    if let Some(rec) = ctx.history.failures(&subject.code) {
        return if can_retake(rec, ctx.current_year_start) {
            Eligibility::Retake
        } else {
            Eligibility::Blocked {
                reason: "Max retakes reached (3x within 6 years)".to_string(),
                unmet: Vec::new(),
            }
        };
    }

    let unmet: Vec<String> = subject
        .prerequisites
        .iter()
        .filter(|p| p.code != YEAR_STANDING_CODE)
        .filter(|p| !ctx.history.has_passed(&p.code))
        .map(|p| p.code.clone())
        .collect();
    if !unmet.is_empty() {
        return Eligibility::Blocked {
            reason: format!(
                "You need to pass the following subjects: {}",
                unmet.join(", ")
            ),
            unmet,
        };
    }

    if needs_year_standing(subject) && !year_standing_met(ctx, subject) {
        return Eligibility::Blocked {
            reason: "Year Standing: Must complete previous semester subjects first".to_string(),
            unmet: Vec::new(),
        };
    }

    Eligibility::Eligible
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitLoad {
    Normal,
    Overload,
    Exceeded,
}

pub fn classify_unit_load(total_units: i64) -> UnitLoad {
    if total_units > MAX_WITH_OVERLOAD {
        UnitLoad::Exceeded
    } else if total_units > MAX_UNIT_LOAD {
        UnitLoad::Overload
    } else {
        UnitLoad::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(code: &str, year: i64, sem: Semester, prereqs: &[&str]) -> SubjectInfo {
        SubjectInfo {
            section: format!("{}-A", code),
            code: code.to_string(),
            description: String::new(),
            units: 3,
            year_level: year,
            semester: sem,
            prerequisites: prereqs
                .iter()
                .map(|c| Prerequisite {
                    kind: PrereqKind::Pre,
                    code: c.to_string(),
                })
                .collect(),
        }
    }

    fn attempt(code: &str, year: &str, status: AttemptStatus) -> Attempt {
        Attempt {
            subject_code: code.to_string(),
            academic_year: year.to_string(),
            status,
        }
    }

    #[test]
    fn grade_status_boundaries() {
        assert_eq!(grade_status(0.0), AttemptStatus::Incomplete);
        assert_eq!(grade_status(1.0), AttemptStatus::Passed);
        assert_eq!(grade_status(3.0), AttemptStatus::Passed);
        assert_eq!(grade_status(3.1), AttemptStatus::Failed);
        assert_eq!(grade_status(5.0), AttemptStatus::Failed);
    }

    #[test]
    fn unit_load_thresholds() {
        assert_eq!(classify_unit_load(0), UnitLoad::Normal);
        assert_eq!(classify_unit_load(25), UnitLoad::Normal);
        assert_eq!(classify_unit_load(26), UnitLoad::Overload);
        assert_eq!(classify_unit_load(27), UnitLoad::Overload);
        assert_eq!(classify_unit_load(28), UnitLoad::Exceeded);
    }

    #[test]
    fn passed_wins_over_earlier_failures() {
        let history = History::from_attempts(&[
            attempt("CS101", "2020-2021", AttemptStatus::Failed),
            attempt("CS101", "2021-2022", AttemptStatus::Passed),
        ]);
        let catalog = vec![subject("CS101", 1, Semester::First, &[])];
        let ctx = EvalContext {
            history: &history,
            catalog: &catalog,
            current_year_start: 2025,
        };
        assert_eq!(evaluate(&ctx, &catalog[0]), Eligibility::Passed);
    }

    #[test]
    fn retake_window_counts_from_first_failure() {
        let rec = FailRecord {
            attempts: 1,
            first_year: Some(2018),
        };
        assert!(can_retake(rec, 2024));
        assert!(!can_retake(rec, 2025));
    }

    #[test]
    fn attempt_cap_applies_without_a_known_year() {
        let rec = FailRecord {
            attempts: MAX_RETAKE_ATTEMPTS,
            first_year: None,
        };
        assert!(!can_retake(rec, 2025));
        let rec = FailRecord {
            attempts: 1,
            first_year: None,
        };
        assert!(can_retake(rec, 2025));

        let history = History::from_attempts(&[
            attempt("CS101", "AY2019", AttemptStatus::Failed),
            attempt("CS101", "AY2020", AttemptStatus::Failed),
            attempt("CS101", "AY2021", AttemptStatus::Failed),
            attempt("CS101", "AY2022", AttemptStatus::Failed),
        ]);
        let catalog = vec![subject("CS101", 1, Semester::First, &[])];
        let ctx = EvalContext {
            history: &history,
            catalog: &catalog,
            current_year_start: 2025,
        };
        assert!(matches!(
            evaluate(&ctx, &catalog[0]),
            Eligibility::Blocked { .. }
        ));
    }

    #[test]
    fn two_failures_inside_the_window_allow_a_retake() {
        let history = History::from_attempts(&[
            attempt("CS101", "2022-2023", AttemptStatus::Failed),
            attempt("CS101", "2023-2024", AttemptStatus::Failed),
        ]);
        assert_eq!(
            history.failures("CS101"),
            Some(FailRecord {
                attempts: 2,
                first_year: Some(2022),
            })
        );
        let catalog = vec![subject("CS101", 1, Semester::First, &[])];
        let ctx = EvalContext {
            history: &history,
            catalog: &catalog,
            current_year_start: 2025,
        };
        assert_eq!(evaluate(&ctx, &catalog[0]), Eligibility::Retake);
    }

    #[test]
    fn missing_prerequisite_names_the_subject() {
        let history = History::default();
        let catalog = vec![
            subject("CS101", 1, Semester::First, &[]),
            subject("CS102", 1, Semester::Second, &["CS101"]),
        ];
        let ctx = EvalContext {
            history: &history,
            catalog: &catalog,
            current_year_start: 2025,
        };
        assert_eq!(
            evaluate(&ctx, &catalog[1]),
            Eligibility::Blocked {
                reason: "You need to pass the following subjects: CS101".to_string(),
                unmet: vec!["CS101".to_string()],
            }
        );
    }

    #[test]
    fn incomplete_attempts_do_not_count_as_failures() {
        let history = History::from_attempts(&[attempt("CS101", "2024-2025", AttemptStatus::Incomplete)]);
        assert!(history.failures("CS101").is_none());
        assert!(!history.has_passed("CS101"));
    }

    #[test]
    fn year_standing_marker_checks_previous_term() {
        let catalog = vec![
            subject("IT111", 1, Semester::Second, &[]),
            subject("IT112", 1, Semester::Second, &[]),
            subject("IT201", 2, Semester::First, &[YEAR_STANDING_CODE]),
        ];
        let partial = History::from_attempts(&[attempt("IT111", "2024-2025", AttemptStatus::Passed)]);
        let ctx = EvalContext {
            history: &partial,
            catalog: &catalog,
            current_year_start: 2025,
        };
        assert!(matches!(
            evaluate(&ctx, &catalog[2]),
            Eligibility::Blocked { .. }
        ));

        let full = History::from_attempts(&[
            attempt("IT111", "2024-2025", AttemptStatus::Passed),
            attempt("IT112", "2024-2025", AttemptStatus::Passed),
        ]);
        let ctx = EvalContext {
            history: &full,
            catalog: &catalog,
            current_year_start: 2025,
        };
        assert_eq!(evaluate(&ctx, &catalog[2]), Eligibility::Eligible);
    }

    #[test]
    fn blocked_serializes_with_status_tag() {
        let v = serde_json::to_value(Eligibility::Blocked {
            reason: "x".into(),
            unmet: vec![],
        })
        .expect("serialize");
        assert_eq!(v, serde_json::json!({ "status": "blocked", "reason": "x" }));
        let v = serde_json::to_value(Eligibility::Retake).expect("serialize");
        assert_eq!(v, serde_json::json!({ "status": "retake" }));
    }
}
