use std::io::Read;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use log::warn;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{AttendanceRecord, AttendanceStatus, QuizAttempt};
use crate::score::RawScore;

/// Attendance export row, shared with the database import.
#[derive(Debug, Deserialize)]
pub struct AttendanceRow {
    pub email: String,
    pub course_title: Option<String>,
    pub status: String,
    pub date: NaiveDate,
    pub source_key: Option<String>,
}

impl AttendanceRow {
    pub fn into_record(self) -> AttendanceRecord {
        AttendanceRecord {
            user_email: self.email,
            course_title: self.course_title,
            status: AttendanceStatus::parse(&self.status),
            date: self.date,
        }
    }
}

/// Quiz attempt export row. `score` is the raw column text.
#[derive(Debug, Deserialize)]
pub struct QuizRow {
    pub email: String,
    pub course_title: Option<String>,
    pub quiz_title: String,
    pub score: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub source_key: Option<String>,
}

impl QuizRow {
    pub fn into_attempt(self) -> QuizAttempt {
        QuizAttempt {
            id: Uuid::new_v4(),
            user_email: self.email,
            course_title: self.course_title,
            quiz_title: self.quiz_title,
            score: RawScore::from_column(self.score.as_deref()),
            submitted_at: self.submitted_at,
        }
    }
}

#[derive(Debug)]
pub struct Loaded<T> {
    pub records: Vec<T>,
    pub skipped: usize,
}

/// Deserializes every row it can. Rows that fail are logged and counted.
pub fn read_rows<T, R>(reader: R) -> anyhow::Result<Loaded<T>>
where
    T: for<'de> Deserialize<'de>,
    R: Read,
{
    let mut reader = csv::Reader::from_reader(reader);
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for (index, result) in reader.deserialize::<T>().enumerate() {
        match result {
            Ok(row) => records.push(row),
            Err(err) => {
                warn!("skipping CSV row {}: {}", index + 1, err);
                skipped += 1;
            }
        }
    }

    Ok(Loaded { records, skipped })
}

pub fn open(path: &Path) -> anyhow::Result<std::fs::File> {
    std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))
}

pub fn load_attendance(path: &Path) -> anyhow::Result<Loaded<AttendanceRecord>> {
    let loaded: Loaded<AttendanceRow> = read_rows(open(path)?)?;
    Ok(Loaded {
        records: loaded
            .records
            .into_iter()
            .map(AttendanceRow::into_record)
            .collect(),
        skipped: loaded.skipped,
    })
}

pub fn load_quiz_attempts(path: &Path) -> anyhow::Result<Loaded<QuizAttempt>> {
    let loaded: Loaded<QuizRow> = read_rows(open(path)?)?;
    Ok(Loaded {
        records: loaded
            .records
            .into_iter()
            .map(QuizRow::into_attempt)
            .collect(),
        skipped: loaded.skipped,
    })
}
