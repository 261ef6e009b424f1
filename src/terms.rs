use anyhow::{anyhow, Context};
use chrono::{Months, NaiveDate, NaiveDateTime};
use serde::Serialize;

/// Boundaries of one academic year as stored in the `settings` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermSettings {
    pub first_sem_start: String,
    pub first_sem_end: String,
    pub first_sem_enrollment_start: String,
    pub first_sem_enrollment_end: String,
    pub second_sem_start: String,
    pub second_sem_end: String,
    pub second_sem_enrollment_start: String,
    pub second_sem_enrollment_end: String,
    pub summer_start: String,
    pub summer_end: String,
    pub current_academic_year: String,
}

pub const DATE_FIELDS: [&str; 10] = [
    "firstSemStart",
    "firstSemEnd",
    "firstSemEnrollmentStart",
    "firstSemEnrollmentEnd",
    "secondSemStart",
    "secondSemEnd",
    "secondSemEnrollmentStart",
    "secondSemEnrollmentEnd",
    "summerStart",
    "summerEnd",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CurrentSemester {
    #[serde(rename = "1st")]
    First,
    #[serde(rename = "2nd")]
    Second,
    Summer,
    Break,
    Unknown,
}

impl CurrentSemester {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::First => "1st",
            Self::Second => "2nd",
            Self::Summer => "Summer",
            Self::Break => "Break",
            Self::Unknown => "Unknown",
        }
    }
}

/// Accepts `YYYY-MM-DD` with an optional time part (`T` or space separated).
pub fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    let s = s.trim();
    let head = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|d| d.date()))
        .with_context(|| format!("invalid date: {}", s))
}

pub fn parse_academic_year(label: &str) -> anyhow::Result<(i32, i32)> {
    let (a, b) = label
        .trim()
        .split_once('-')
        .ok_or_else(|| anyhow!("academic year must look like YYYY-YYYY: {}", label))?;
    if a.len() != 4 || b.len() != 4 {
        return Err(anyhow!("academic year must look like YYYY-YYYY: {}", label));
    }
    let start: i32 = a.parse().context("academic year start")?;
    let end: i32 = b.parse().context("academic year end")?;
    if end != start + 1 {
        return Err(anyhow!("academic year must span consecutive years: {}", label));
    }
    Ok((start, end))
}

fn within(today: NaiveDate, start: &str, end: &str) -> anyhow::Result<bool> {
    let start = parse_date(start)?;
    let end = parse_date(end)?;
    Ok(start <= today && today <= end)
}

pub fn determine_semester(settings: &TermSettings, today: NaiveDate) -> CurrentSemester {
    let check = || -> anyhow::Result<CurrentSemester> {
        if within(today, &settings.first_sem_start, &settings.first_sem_end)? {
            return Ok(CurrentSemester::First);
        }
        if within(today, &settings.second_sem_start, &settings.second_sem_end)? {
            return Ok(CurrentSemester::Second);
        }
        if within(today, &settings.summer_start, &settings.summer_end)? {
            return Ok(CurrentSemester::Summer);
        }
        Ok(CurrentSemester::Break)
    };
    check().unwrap_or(CurrentSemester::Unknown)
}

pub fn enrollment_open(settings: &TermSettings, today: NaiveDate) -> bool {
    let first = within(
        today,
        &settings.first_sem_enrollment_start,
        &settings.first_sem_enrollment_end,
    )
    .unwrap_or(false);
    let second = within(
        today,
        &settings.second_sem_enrollment_start,
        &settings.second_sem_enrollment_end,
    )
    .unwrap_or(false);
    first || second
}

pub fn validate(settings: &TermSettings) -> anyhow::Result<()> {
    for (name, value) in DATE_FIELDS.iter().zip(settings.dates()) {
        parse_date(value).with_context(|| format!("{} is not a date", name))?;
    }
    parse_academic_year(&settings.current_academic_year)?;
    Ok(())
}

fn shift_one_year(s: &str) -> anyhow::Result<String> {
    let d = parse_date(s)?;
    let shifted = d
        .checked_add_months(Months::new(12))
        .ok_or_else(|| anyhow!("date out of range: {}", s))?;
    Ok(shifted.format("%Y-%m-%d").to_string())
}

/// Settings for the following academic year, or `None` while summer has not ended yet.
pub fn rollover(settings: &TermSettings, today: NaiveDate) -> anyhow::Result<Option<TermSettings>> {
    let summer_end = parse_date(&settings.summer_end)?;
    if today <= summer_end {
        return Ok(None);
    }
    let (start, end) = parse_academic_year(&settings.current_academic_year)?;
    Ok(Some(TermSettings {
        first_sem_start: shift_one_year(&settings.first_sem_start)?,
        first_sem_end: shift_one_year(&settings.first_sem_end)?,
        first_sem_enrollment_start: shift_one_year(&settings.first_sem_enrollment_start)?,
        first_sem_enrollment_end: shift_one_year(&settings.first_sem_enrollment_end)?,
        second_sem_start: shift_one_year(&settings.second_sem_start)?,
        second_sem_end: shift_one_year(&settings.second_sem_end)?,
        second_sem_enrollment_start: shift_one_year(&settings.second_sem_enrollment_start)?,
        second_sem_enrollment_end: shift_one_year(&settings.second_sem_enrollment_end)?,
        summer_start: shift_one_year(&settings.summer_start)?,
        summer_end: shift_one_year(&settings.summer_end)?,
        current_academic_year: format!("{}-{}", start + 1, end + 1),
    }))
}

impl TermSettings {
    pub fn dates(&self) -> [&str; 10] {
        [
            &self.first_sem_start,
            &self.first_sem_end,
            &self.first_sem_enrollment_start,
            &self.first_sem_enrollment_end,
            &self.second_sem_start,
            &self.second_sem_end,
            &self.second_sem_enrollment_start,
            &self.second_sem_enrollment_end,
            &self.summer_start,
            &self.summer_end,
        ]
    }
}

/// Today's date in local time.
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}
