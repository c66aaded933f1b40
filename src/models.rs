use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::score::RawScore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Unrecognized(String),
}

impl AttendanceStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "present" => AttendanceStatus::Present,
            "absent" => AttendanceStatus::Absent,
            "late" => AttendanceStatus::Late,
            _ => AttendanceStatus::Unrecognized(value.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Unrecognized(text) => text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub user_email: String,
    pub course_title: Option<String>,
    pub status: AttendanceStatus,
    pub date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct QuizAttempt {
    pub id: Uuid,
    pub user_email: String,
    pub course_title: Option<String>,
    pub quiz_title: String,
    pub score: RawScore,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LinkClick {
    pub user_email: String,
    pub course_title: Option<String>,
    pub url: String,
    pub clicked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceSummary {
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub total: usize,
    pub percentage: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuizSummary {
    pub attended: usize,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseAttendance {
    pub course: String,
    pub summary: AttendanceSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseQuizSummary {
    pub course: String,
    pub attempts: usize,
    pub summary: QuizSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationBucket {
    pub key: String,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub label: String,
    pub value: f64,
}
