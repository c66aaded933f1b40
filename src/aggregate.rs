use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::hash::Hash;

use chrono::{Datelike, Days, NaiveDate, Utc};
use clap::ValueEnum;
use log::debug;
use serde::Deserialize;

use crate::models::{
    AggregationBucket, AttendanceRecord, AttendanceStatus, AttendanceSummary, CourseAttendance,
    CourseQuizSummary, LinkClick, QuizAttempt, QuizSummary, SeriesPoint,
};
use crate::score;

pub const UNKNOWN_COURSE: &str = "Unknown Course";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Day,
    /// Weeks start on Monday.
    Week,
    Month,
}

impl Granularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }

    pub fn bucket_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Day => date,
            Granularity::Week => date
                .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
                .unwrap_or(date),
            Granularity::Month => {
                NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
            }
        }
    }

    /// Labels sort lexicographically in chronological order.
    pub fn label(self, date: NaiveDate) -> String {
        let start = self.bucket_start(date);
        match self {
            Granularity::Day | Granularity::Week => start.format("%Y-%m-%d").to_string(),
            Granularity::Month => start.format("%Y-%m").to_string(),
        }
    }
}

/// Start of a reporting window of `since_days` days ending today. Windows
/// reaching past the calendar's range start at `NaiveDate::MIN`.
pub fn cutoff_date(since_days: i64) -> NaiveDate {
    let days = u64::try_from(since_days.max(1)).unwrap_or(1);
    Utc::now()
        .date_naive()
        .checked_sub_days(Days::new(days))
        .unwrap_or(NaiveDate::MIN)
}

pub fn course_key(title: Option<&str>, placeholder: &str) -> String {
    match title.map(str::trim) {
        Some(title) if !title.is_empty() => title.to_string(),
        _ => placeholder.to_string(),
    }
}

/// Groups records by key, keeping keys in the order they were first seen.
pub fn group_by<'a, T, K, F>(records: &'a [T], key_fn: F) -> Vec<(K, Vec<&'a T>)>
where
    K: Eq + Hash + Clone,
    F: Fn(&T) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, Vec<&'a T>)> = Vec::new();

    for record in records {
        let key = key_fn(record);
        match index.get(&key) {
            Some(&position) => groups[position].1.push(record),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![record]));
            }
        }
    }

    groups
}

pub fn count_buckets<T, K, F>(records: &[T], key_fn: F) -> Vec<AggregationBucket>
where
    K: Eq + Hash + Clone + Display,
    F: Fn(&T) -> K,
{
    let total = records.len();
    group_by(records, key_fn)
        .into_iter()
        .map(|(key, group)| AggregationBucket {
            key: key.to_string(),
            count: group.len(),
            percentage: share(group.len(), total),
        })
        .collect()
}

pub fn summarize_attendance<'a, I>(records: I) -> AttendanceSummary
where
    I: IntoIterator<Item = &'a AttendanceRecord>,
{
    let mut summary = AttendanceSummary::default();

    for record in records {
        match &record.status {
            AttendanceStatus::Present => summary.present += 1,
            AttendanceStatus::Absent => summary.absent += 1,
            AttendanceStatus::Late => summary.late += 1,
            AttendanceStatus::Unrecognized(status) => {
                debug!(
                    "excluding attendance on {} with unrecognized status {:?}",
                    record.date, status
                );
                continue;
            }
        }
        summary.total += 1;
    }

    summary.percentage = if summary.total > 0 {
        (100.0 * summary.present as f64 / summary.total as f64).round() as u32
    } else {
        0
    };
    summary
}

pub fn summarize_percentages<I>(percentages: I) -> QuizSummary
where
    I: IntoIterator<Item = Option<f64>>,
{
    let mut attended = 0usize;
    let mut sum = 0.0;

    for value in percentages.into_iter().flatten() {
        let next = sum + value;
        if !next.is_finite() {
            debug!("excluding percentage {value} that overflows the running sum");
            continue;
        }
        attended += 1;
        sum = next;
    }

    QuizSummary {
        attended,
        average: if attended == 0 {
            0.0
        } else {
            round_1_decimal(sum / attended as f64)
        },
    }
}

pub fn summarize_quiz_attempts<'a, I>(attempts: I) -> QuizSummary
where
    I: IntoIterator<Item = &'a QuizAttempt>,
{
    summarize_percentages(attempts.into_iter().map(|attempt| {
        let normalized = score::normalize(&attempt.score);
        if normalized.percentage.is_none() {
            debug!(
                "excluding attempt {} with unparseable score {:?}",
                attempt.id, normalized.display_text
            );
        }
        normalized.percentage
    }))
}

/// Sums `value_fn` per bucket. Only buckets with at least one record appear,
/// ordered by key. Records without a bucket are dropped; non-finite values
/// count toward the bucket but not its sum.
pub fn build_time_series<T, K, D, V>(records: &[T], date_fn: D, value_fn: V) -> Vec<SeriesPoint>
where
    K: Ord + Display,
    D: Fn(&T) -> Option<K>,
    V: Fn(&T) -> f64,
{
    let mut buckets: BTreeMap<K, f64> = BTreeMap::new();

    for record in records {
        let Some(key) = date_fn(record) else {
            continue;
        };
        let value = value_fn(record);
        let entry = buckets.entry(key).or_insert(0.0);
        if value.is_finite() {
            *entry += value;
        }
    }

    buckets
        .into_iter()
        .map(|(key, value)| SeriesPoint {
            label: key.to_string(),
            value,
        })
        .collect()
}

pub fn attendance_by_course(
    records: &[AttendanceRecord],
    placeholder: &str,
) -> Vec<CourseAttendance> {
    group_by(records, |record| {
        course_key(record.course_title.as_deref(), placeholder)
    })
    .into_iter()
    .map(|(course, group)| CourseAttendance {
        course,
        summary: summarize_attendance(group),
    })
    .collect()
}

pub fn quizzes_by_course(attempts: &[QuizAttempt], placeholder: &str) -> Vec<CourseQuizSummary> {
    group_by(attempts, |attempt| {
        course_key(attempt.course_title.as_deref(), placeholder)
    })
    .into_iter()
    .map(|(course, group)| CourseQuizSummary {
        course,
        attempts: group.len(),
        summary: summarize_quiz_attempts(group),
    })
    .collect()
}

/// Present percentage per bucket. Buckets whose records all carry an
/// unrecognized status are left out.
pub fn attendance_rate_series(
    records: &[AttendanceRecord],
    granularity: Granularity,
) -> Vec<SeriesPoint> {
    let mut buckets: BTreeMap<String, Vec<&AttendanceRecord>> = BTreeMap::new();
    for record in records {
        buckets
            .entry(granularity.label(record.date))
            .or_default()
            .push(record);
    }

    buckets
        .into_iter()
        .filter_map(|(label, group)| {
            let summary = summarize_attendance(group);
            (summary.total > 0).then(|| SeriesPoint {
                label,
                value: f64::from(summary.percentage),
            })
        })
        .collect()
}

/// Average valid quiz percentage per bucket.
pub fn quiz_score_series(attempts: &[QuizAttempt], granularity: Granularity) -> Vec<SeriesPoint> {
    let mut buckets: BTreeMap<String, Vec<Option<f64>>> = BTreeMap::new();
    for attempt in attempts {
        buckets
            .entry(granularity.label(attempt.submitted_at.date_naive()))
            .or_default()
            .push(score::normalize(&attempt.score).percentage);
    }

    buckets
        .into_iter()
        .filter_map(|(label, values)| {
            let summary = summarize_percentages(values);
            (summary.attended > 0).then(|| SeriesPoint {
                label,
                value: summary.average,
            })
        })
        .collect()
}

pub fn click_series(clicks: &[LinkClick], granularity: Granularity) -> Vec<SeriesPoint> {
    build_time_series(
        clicks,
        |click| Some(granularity.label(click.clicked_at.date_naive())),
        |_| 1.0,
    )
}

fn share(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        round_1_decimal(100.0 * count as f64 / total as f64)
    }
}

pub fn round_1_decimal(value: f64) -> f64 {
    let scaled = value * 10.0;
    if scaled.is_finite() {
        scaled.round() / 10.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::RawScore;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn attendance(course: Option<&str>, status: &str, day: u32) -> AttendanceRecord {
        AttendanceRecord {
            user_email: "avery@example.com".to_string(),
            course_title: course.map(str::to_string),
            status: AttendanceStatus::parse(status),
            date: date(2026, 3, day),
        }
    }

    fn attempt(course: Option<&str>, raw: &str, day: u32) -> QuizAttempt {
        QuizAttempt {
            id: Uuid::new_v4(),
            user_email: "avery@example.com".to_string(),
            course_title: course.map(str::to_string),
            quiz_title: "Unit quiz".to_string(),
            score: RawScore::from_text(raw),
            submitted_at: Utc.with_ymd_and_hms(2026, 3, day, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn empty_attendance_summarizes_to_zero() {
        let summary = summarize_attendance(&Vec::<AttendanceRecord>::new());
        assert_eq!(summary, AttendanceSummary::default());
        assert_eq!(summary.percentage, 0);
    }

    #[test]
    fn attendance_percentage_is_rounded() {
        let records = vec![
            attendance(Some("Biology"), "present", 2),
            attendance(Some("Biology"), "present", 3),
            attendance(Some("Biology"), "absent", 4),
        ];
        let summary = summarize_attendance(&records);
        assert_eq!(
            summary,
            AttendanceSummary {
                present: 2,
                absent: 1,
                late: 0,
                total: 3,
                percentage: 67,
            }
        );
    }

    #[test]
    fn late_counts_toward_total_but_not_present() {
        let records = vec![
            attendance(None, "Present", 2),
            attendance(None, "LATE", 3),
        ];
        let summary = summarize_attendance(&records);
        assert_eq!(summary.late, 1);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.percentage, 50);
    }

    #[test]
    fn unrecognized_status_is_excluded() {
        let records = vec![
            attendance(None, "present", 2),
            attendance(None, "excused", 3),
        ];
        let summary = summarize_attendance(&records);
        assert_eq!(summary.total, 1);
        assert_eq!(summary.percentage, 100);
    }

    #[test]
    fn quiz_summary_ignores_unparseable_scores() {
        let attempts = vec![
            attempt(None, "3/5", 2),
            attempt(None, "bad", 3),
            attempt(None, "4/4", 4),
        ];
        let summary = summarize_quiz_attempts(&attempts);
        assert_eq!(summary.attended, 2);
        assert!((summary.average - 80.0).abs() < 1e-9);
    }

    #[test]
    fn quiz_summary_rounds_to_one_decimal() {
        let attempts = vec![attempt(None, "1/3", 2), attempt(None, "1/3", 3)];
        let summary = summarize_quiz_attempts(&attempts);
        assert!((summary.average - 33.3).abs() < 1e-9);
    }

    #[test]
    fn quiz_summary_without_valid_scores_is_zero() {
        let attempts = vec![attempt(None, "", 2), attempt(None, "0/0", 3)];
        let summary = summarize_quiz_attempts(&attempts);
        assert_eq!(summary, QuizSummary { attended: 0, average: 0.0 });
        assert_eq!(summarize_quiz_attempts(&Vec::<QuizAttempt>::new()), QuizSummary::default());
    }

    #[test]
    fn group_by_preserves_first_seen_order() {
        let records = vec!["B", "A", "B"];
        let groups = group_by(&records, |value| value.to_string());
        let keys: Vec<&str> = groups.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(keys, vec!["B", "A"]);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].1.len(), 1);
    }

    #[test]
    fn missing_course_falls_back_to_placeholder() {
        assert_eq!(course_key(None, UNKNOWN_COURSE), UNKNOWN_COURSE);
        assert_eq!(course_key(Some("  "), UNKNOWN_COURSE), UNKNOWN_COURSE);
        assert_eq!(course_key(Some(" Physics "), UNKNOWN_COURSE), "Physics");
    }

    #[test]
    fn attendance_groups_by_course() {
        let records = vec![
            attendance(Some("Physics"), "present", 2),
            attendance(None, "absent", 2),
            attendance(Some("Physics"), "absent", 3),
        ];
        let courses = attendance_by_course(&records, UNKNOWN_COURSE);
        assert_eq!(courses.len(), 2);
        assert_eq!(courses[0].course, "Physics");
        assert_eq!(courses[0].summary.percentage, 50);
        assert_eq!(courses[1].course, UNKNOWN_COURSE);
        assert_eq!(courses[1].summary.absent, 1);
    }

    #[test]
    fn quizzes_group_by_course_and_count_every_attempt() {
        let attempts = vec![
            attempt(Some("Chemistry"), "1/2", 2),
            attempt(Some("Chemistry"), "legacy", 3),
        ];
        let courses = quizzes_by_course(&attempts, UNKNOWN_COURSE);
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].attempts, 2);
        assert_eq!(courses[0].summary.attended, 1);
        assert!((courses[0].summary.average - 50.0).abs() < 1e-9);
    }

    #[test]
    fn bucket_shares_follow_input_order() {
        let records = vec![
            attendance(None, "present", 2),
            attendance(None, "absent", 2),
            attendance(None, "present", 3),
        ];
        let buckets = count_buckets(&records, |record| record.status.as_str().to_string());
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].key, "present");
        assert_eq!(buckets[0].count, 2);
        assert!((buckets[0].percentage - 66.7).abs() < 1e-9);
        assert!((buckets[1].percentage - 33.3).abs() < 1e-9);
        assert!(count_buckets(&Vec::<AttendanceRecord>::new(), |_| 0).is_empty());
    }

    #[test]
    fn time_series_is_sparse_and_chronological() {
        let records = vec![
            attendance(None, "present", 9),
            attendance(None, "present", 2),
            attendance(None, "absent", 2),
        ];
        let series = build_time_series(&records, |record| Some(record.date), |_| 1.0);
        assert_eq!(
            series,
            vec![
                SeriesPoint {
                    label: "2026-03-02".to_string(),
                    value: 2.0,
                },
                SeriesPoint {
                    label: "2026-03-09".to_string(),
                    value: 1.0,
                },
            ]
        );
    }

    #[test]
    fn time_series_skips_records_without_bucket_and_non_finite_values() {
        let values = vec![(Some(1), 2.0), (None, 5.0), (Some(1), f64::NAN), (Some(2), 1.5)];
        let series = build_time_series(&values, |(key, _)| *key, |(_, value)| *value);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].value, 2.0);
        assert_eq!(series[1].value, 1.5);
    }

    #[test]
    fn cutoff_date_respects_since_days() {
        let expected = Utc::now().date_naive() - Duration::days(14);
        assert_eq!(cutoff_date(14), expected);
        assert_eq!(cutoff_date(0), Utc::now().date_naive() - Duration::days(1));
    }

    #[test]
    fn cutoff_date_saturates_for_huge_windows() {
        assert_eq!(cutoff_date(i64::MAX), NaiveDate::MIN);
        assert_eq!(cutoff_date(1_000_000_000), NaiveDate::MIN);
    }

    #[test]
    fn week_bucket_at_calendar_start_does_not_underflow() {
        let start = Granularity::Week.bucket_start(NaiveDate::MIN);
        assert!(start <= NaiveDate::MIN + Duration::days(6));
        assert!(!Granularity::Week.label(NaiveDate::MIN).is_empty());
    }

    #[test]
    fn overflowing_percentages_are_excluded_from_the_average() {
        let summary = summarize_percentages([Some(1.7e308), Some(1.7e308)]);
        assert_eq!(summary.attended, 1);
        assert!(summary.average.is_finite());
        assert_eq!(summary.average, 1.7e308);
    }

    #[test]
    fn granularity_buckets_dates() {
        // 2026-03-04 is a Wednesday.
        let day = date(2026, 3, 4);
        assert_eq!(Granularity::Day.label(day), "2026-03-04");
        assert_eq!(Granularity::Week.label(day), "2026-03-02");
        assert_eq!(Granularity::Month.label(day), "2026-03");
        assert_eq!(Granularity::Week.bucket_start(date(2026, 3, 2)), date(2026, 3, 2));
    }

    #[test]
    fn attendance_rate_series_by_week() {
        let records = vec![
            attendance(None, "present", 2),
            attendance(None, "absent", 4),
            attendance(None, "present", 10),
            attendance(None, "excused", 20),
        ];
        let series = attendance_rate_series(&records, Granularity::Week);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].label, "2026-03-02");
        assert_eq!(series[0].value, 50.0);
        assert_eq!(series[1].label, "2026-03-09");
        assert_eq!(series[1].value, 100.0);
    }

    #[test]
    fn quiz_series_omits_buckets_without_valid_scores() {
        let attempts = vec![
            attempt(None, "1/2", 2),
            attempt(None, "1/1", 2),
            attempt(None, "n/a", 5),
        ];
        let series = quiz_score_series(&attempts, Granularity::Day);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].label, "2026-03-02");
        assert!((series[0].value - 75.0).abs() < 1e-9);
    }

    #[test]
    fn click_series_counts_per_day() {
        let click = |day: u32| LinkClick {
            user_email: "avery@example.com".to_string(),
            course_title: None,
            url: "https://example.com/notes".to_string(),
            clicked_at: Utc.with_ymd_and_hms(2026, 3, day, 8, 30, 0).unwrap(),
        };
        let clicks = vec![click(3), click(1), click(3)];
        let series = click_series(&clicks, Granularity::Day);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].label, "2026-03-01");
        assert_eq!(series[1].value, 2.0);
    }
}
