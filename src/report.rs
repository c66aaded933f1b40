use std::fmt::Write;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::aggregate::{self, Granularity};
use crate::models::{
    AggregationBucket, AttendanceRecord, AttendanceSummary, CourseAttendance, CourseQuizSummary,
    LinkClick, QuizAttempt, QuizSummary, SeriesPoint,
};
use crate::score::{self, NormalizedScore};

const RECENT_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct AttemptLine {
    pub quiz_title: String,
    pub course: String,
    pub submitted_at: DateTime<Utc>,
    pub score: NormalizedScore,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub scope: String,
    pub since: NaiveDate,
    pub granularity: String,
    pub attendance: AttendanceSummary,
    pub status_mix: Vec<AggregationBucket>,
    pub attendance_by_course: Vec<CourseAttendance>,
    pub attendance_series: Vec<SeriesPoint>,
    pub quizzes: QuizSummary,
    pub quizzes_by_course: Vec<CourseQuizSummary>,
    pub quiz_series: Vec<SeriesPoint>,
    pub recent_attempts: Vec<AttemptLine>,
    pub link_clicks: usize,
    pub click_series: Vec<SeriesPoint>,
}

pub struct DashboardInput<'a> {
    pub scope: Option<&'a str>,
    pub since: NaiveDate,
    pub granularity: Granularity,
    pub unknown_course_label: &'a str,
    pub attendance: &'a [AttendanceRecord],
    pub attempts: &'a [QuizAttempt],
    pub clicks: &'a [LinkClick],
}

pub fn build_dashboard(input: DashboardInput<'_>) -> Dashboard {
    let placeholder = input.unknown_course_label;

    let mut recent: Vec<&QuizAttempt> = input.attempts.iter().collect();
    recent.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
    let recent_attempts = recent
        .into_iter()
        .take(RECENT_ATTEMPTS)
        .map(|attempt| AttemptLine {
            quiz_title: attempt.quiz_title.clone(),
            course: aggregate::course_key(attempt.course_title.as_deref(), placeholder),
            submitted_at: attempt.submitted_at,
            score: score::normalize(&attempt.score),
        })
        .collect();

    Dashboard {
        scope: input.scope.unwrap_or("all learners").to_string(),
        since: input.since,
        granularity: input.granularity.as_str().to_string(),
        attendance: aggregate::summarize_attendance(input.attendance),
        status_mix: aggregate::count_buckets(input.attendance, |record| {
            record.status.as_str().to_string()
        }),
        attendance_by_course: aggregate::attendance_by_course(input.attendance, placeholder),
        attendance_series: aggregate::attendance_rate_series(input.attendance, input.granularity),
        quizzes: aggregate::summarize_quiz_attempts(input.attempts),
        quizzes_by_course: aggregate::quizzes_by_course(input.attempts, placeholder),
        quiz_series: aggregate::quiz_score_series(input.attempts, input.granularity),
        recent_attempts,
        link_clicks: input.clicks.len(),
        click_series: aggregate::click_series(input.clicks, input.granularity),
    }
}

pub fn format_percentage(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{value:.1}%"),
        None => score::EMPTY_DISPLAY.to_string(),
    }
}

fn write_series(output: &mut String, series: &[SeriesPoint], unit: &str) {
    if series.is_empty() {
        let _ = writeln!(output, "No data points for this window.");
        return;
    }
    for point in series {
        let _ = writeln!(output, "- {}: {}{}", point.label, point.value, unit);
    }
}

pub fn render_markdown(dashboard: &Dashboard, top_courses: usize) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Course Insights Report");
    let _ = writeln!(
        output,
        "Generated for {} (activity since {}, {} buckets)",
        dashboard.scope, dashboard.since, dashboard.granularity
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Attendance");

    let attendance = &dashboard.attendance;
    if attendance.total == 0 {
        let _ = writeln!(output, "No attendance recorded for this window.");
    } else {
        let _ = writeln!(
            output,
            "{}% present across {} sessions ({} present, {} late, {} absent)",
            attendance.percentage,
            attendance.total,
            attendance.present,
            attendance.late,
            attendance.absent
        );
        let _ = writeln!(output);
        for bucket in &dashboard.status_mix {
            let _ = writeln!(
                output,
                "- {}: {} ({:.1}%)",
                bucket.key, bucket.count, bucket.percentage
            );
        }
        let _ = writeln!(output);
        let _ = writeln!(output, "### By Course");
        for course in dashboard.attendance_by_course.iter().take(top_courses) {
            let _ = writeln!(
                output,
                "- {}: {}% of {} sessions",
                course.course, course.summary.percentage, course.summary.total
            );
        }
        let _ = writeln!(output);
        let _ = writeln!(output, "### Attendance Rate");
        write_series(&mut output, &dashboard.attendance_series, "%");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Quizzes");

    let quizzes = &dashboard.quizzes;
    if quizzes.attended == 0 {
        let _ = writeln!(output, "No graded quiz attempts for this window.");
    } else {
        let _ = writeln!(
            output,
            "Average {:.1}% across {} graded attempts",
            quizzes.average, quizzes.attended
        );
        let _ = writeln!(output);
        let _ = writeln!(output, "### By Course");
        for course in dashboard.quizzes_by_course.iter().take(top_courses) {
            let _ = writeln!(
                output,
                "- {}: average {:.1}% ({} of {} attempts graded)",
                course.course, course.summary.average, course.summary.attended, course.attempts
            );
        }
        let _ = writeln!(output);
        let _ = writeln!(output, "### Score Trend");
        write_series(&mut output, &dashboard.quiz_series, "%");
    }

    if !dashboard.recent_attempts.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "### Recent Attempts");
        for line in &dashboard.recent_attempts {
            let _ = writeln!(
                output,
                "- {} ({}) on {}: {} [{}]",
                line.quiz_title,
                line.course,
                line.submitted_at.date_naive(),
                line.score.display_text,
                format_percentage(line.score.percentage)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Link Clicks");
    if dashboard.link_clicks == 0 {
        let _ = writeln!(output, "No link clicks recorded for this window.");
    } else {
        let _ = writeln!(output, "{} clicks", dashboard.link_clicks);
        write_series(&mut output, &dashboard.click_series, "");
    }

    output
}

pub fn render_json(dashboard: &Dashboard) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(dashboard)?)
}
