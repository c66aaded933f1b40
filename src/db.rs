use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use log::{info, warn};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::models::{AttendanceRecord, AttendanceStatus, LinkClick, QuizAttempt};
use crate::score::RawScore;
use crate::source::{self, AttendanceRow, QuizRow};

/// Filters applied to every fetch.
#[derive(Debug, Clone)]
pub struct Scope {
    pub since: NaiveDate,
    pub email: Option<String>,
    pub course: Option<String>,
}

impl Scope {
    fn since_start(&self) -> DateTime<Utc> {
        self.since.and_time(NaiveTime::MIN).and_utc()
    }

    fn push_filters(&self, query: &mut QueryBuilder<'_, Postgres>, alias: &str) {
        if let Some(email) = &self.email {
            query.push(format!(" AND {alias}.user_email = "));
            query.push_bind(email.clone());
        }
        if let Some(course) = &self.course {
            query.push(" AND c.title = ");
            query.push_bind(course.clone());
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportStats {
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn upsert_course(pool: &PgPool, title: &str) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO lms_insights.courses (id, title)
        VALUES ($1, $2)
        ON CONFLICT (title) DO UPDATE SET title = EXCLUDED.title
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(title)
    .fetch_one(pool)
    .await
    .with_context(|| format!("upserting course {title}"))?
    .try_get("id")?;
    Ok(id)
}

async fn course_id(pool: &PgPool, title: Option<&str>) -> anyhow::Result<Option<Uuid>> {
    match title.map(str::trim).filter(|title| !title.is_empty()) {
        Some(title) => Ok(Some(upsert_course(pool, title).await?)),
        None => Ok(None),
    }
}

async fn insert_attendance(
    pool: &PgPool,
    email: &str,
    course: Option<Uuid>,
    status: &str,
    attended_on: NaiveDate,
    source_key: &str,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO lms_insights.attendance
        (id, user_email, course_id, status, attended_on, source_key)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(course)
    .bind(status)
    .bind(attended_on)
    .bind(source_key)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn insert_quiz_attempt(
    pool: &PgPool,
    email: &str,
    course: Option<Uuid>,
    quiz_title: &str,
    score: Option<&str>,
    submitted_at: DateTime<Utc>,
    source_key: &str,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO lms_insights.quiz_attempts
        (id, user_email, course_id, quiz_title, score, submitted_at, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(course)
    .bind(quiz_title)
    .bind(score)
    .bind(submitted_at)
    .bind(source_key)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

fn seed_time(y: i32, m: u32, d: u32, h: u32) -> anyhow::Result<DateTime<Utc>> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0)
        .single()
        .context("invalid seed timestamp")
}

fn seed_date(y: i32, m: u32, d: u32) -> anyhow::Result<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d).context("invalid seed date")
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let attendance = vec![
        ("seed-att-001", "avery.lee@example.edu", Some("Biology 101"), "present", seed_date(2026, 3, 2)?),
        ("seed-att-002", "avery.lee@example.edu", Some("Biology 101"), "late", seed_date(2026, 3, 4)?),
        ("seed-att-003", "avery.lee@example.edu", Some("Chemistry 110"), "absent", seed_date(2026, 3, 5)?),
        ("seed-att-004", "jules.moreno@example.edu", Some("Biology 101"), "present", seed_date(2026, 3, 2)?),
        ("seed-att-005", "jules.moreno@example.edu", None, "present", seed_date(2026, 3, 9)?),
    ];

    for (source_key, email, course, status, attended_on) in attendance {
        let course = course_id(pool, course).await?;
        insert_attendance(pool, email, course, status, attended_on, source_key).await?;
    }

    let attempts = vec![
        ("seed-quiz-001", "avery.lee@example.edu", Some("Biology 101"), "Cell structure", Some("3/5"), seed_time(2026, 3, 3, 14)?),
        ("seed-quiz-002", "avery.lee@example.edu", Some("Biology 101"), "Mitosis", Some(r#"{"score":"4/4","answers":[1,3,2,4]}"#), seed_time(2026, 3, 10, 9)?),
        ("seed-quiz-003", "avery.lee@example.edu", Some("Chemistry 110"), "Moles", Some("pending review"), seed_time(2026, 3, 6, 11)?),
        ("seed-quiz-004", "jules.moreno@example.edu", Some("Biology 101"), "Cell structure", Some("5/5"), seed_time(2026, 3, 3, 15)?),
        ("seed-quiz-005", "jules.moreno@example.edu", Some("Chemistry 110"), "Moles", None, seed_time(2026, 3, 6, 12)?),
    ];

    for (source_key, email, course, quiz_title, score, submitted_at) in attempts {
        let course = course_id(pool, course).await?;
        insert_quiz_attempt(pool, email, course, quiz_title, score, submitted_at, source_key)
            .await?;
    }

    let clicks = vec![
        ("seed-click-001", "avery.lee@example.edu", Some("Biology 101"), "https://example.edu/bio/notes-1", seed_time(2026, 3, 2, 8)?),
        ("seed-click-002", "avery.lee@example.edu", Some("Biology 101"), "https://example.edu/bio/notes-1", seed_time(2026, 3, 2, 19)?),
        ("seed-click-003", "jules.moreno@example.edu", Some("Chemistry 110"), "https://example.edu/chem/lab", seed_time(2026, 3, 5, 10)?),
    ];

    for (source_key, email, course, url, clicked_at) in clicks {
        let course = course_id(pool, course).await?;
        sqlx::query(
            r#"
            INSERT INTO lms_insights.link_clicks
            (id, user_email, course_id, url, clicked_at, source_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(course)
        .bind(url)
        .bind(clicked_at)
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn fetch_attendance(pool: &PgPool, scope: &Scope) -> anyhow::Result<Vec<AttendanceRecord>> {
    let mut query = QueryBuilder::<Postgres>::new(
        "SELECT a.user_email, c.title AS course_title, a.status, a.attended_on \
         FROM lms_insights.attendance a \
         LEFT JOIN lms_insights.courses c ON c.id = a.course_id \
         WHERE a.attended_on >= ",
    );
    query.push_bind(scope.since);
    scope.push_filters(&mut query, "a");
    query.push(" ORDER BY a.attended_on");

    let rows = query.build().fetch_all(pool).await?;
    let mut records = Vec::with_capacity(rows.len());

    for row in rows {
        let status: String = row.try_get("status")?;
        records.push(AttendanceRecord {
            user_email: row.try_get("user_email")?,
            course_title: row.try_get("course_title")?,
            status: AttendanceStatus::parse(&status),
            date: row.try_get("attended_on")?,
        });
    }

    info!("fetched {} attendance rows since {}", records.len(), scope.since);
    Ok(records)
}

pub async fn fetch_quiz_attempts(pool: &PgPool, scope: &Scope) -> anyhow::Result<Vec<QuizAttempt>> {
    let mut query = QueryBuilder::<Postgres>::new(
        "SELECT q.id, q.user_email, c.title AS course_title, q.quiz_title, q.score, q.submitted_at \
         FROM lms_insights.quiz_attempts q \
         LEFT JOIN lms_insights.courses c ON c.id = q.course_id \
         WHERE q.submitted_at >= ",
    );
    query.push_bind(scope.since_start());
    scope.push_filters(&mut query, "q");
    query.push(" ORDER BY q.submitted_at");

    let rows = query.build().fetch_all(pool).await?;
    let mut attempts = Vec::with_capacity(rows.len());

    for row in rows {
        let score: Option<String> = row.try_get("score")?;
        attempts.push(QuizAttempt {
            id: row.try_get("id")?,
            user_email: row.try_get("user_email")?,
            course_title: row.try_get("course_title")?,
            quiz_title: row.try_get("quiz_title")?,
            score: RawScore::from_column(score.as_deref()),
            submitted_at: row.try_get("submitted_at")?,
        });
    }

    info!("fetched {} quiz attempts since {}", attempts.len(), scope.since);
    Ok(attempts)
}

pub async fn fetch_link_clicks(pool: &PgPool, scope: &Scope) -> anyhow::Result<Vec<LinkClick>> {
    let mut query = QueryBuilder::<Postgres>::new(
        "SELECT l.user_email, c.title AS course_title, l.url, l.clicked_at \
         FROM lms_insights.link_clicks l \
         LEFT JOIN lms_insights.courses c ON c.id = l.course_id \
         WHERE l.clicked_at >= ",
    );
    query.push_bind(scope.since_start());
    scope.push_filters(&mut query, "l");
    query.push(" ORDER BY l.clicked_at");

    let rows = query.build().fetch_all(pool).await?;
    let mut clicks = Vec::with_capacity(rows.len());

    for row in rows {
        clicks.push(LinkClick {
            user_email: row.try_get("user_email")?,
            course_title: row.try_get("course_title")?,
            url: row.try_get("url")?,
            clicked_at: row.try_get("clicked_at")?,
        });
    }

    info!("fetched {} link clicks since {}", clicks.len(), scope.since);
    Ok(clicks)
}

fn source_key_or_new(source_key: Option<String>) -> String {
    source_key.unwrap_or_else(|| format!("import-{}", Uuid::new_v4()))
}

pub async fn import_attendance_csv(pool: &PgPool, csv_path: &Path) -> anyhow::Result<ImportStats> {
    let file = source::open(csv_path)?;
    let loaded = source::read_rows::<AttendanceRow, _>(file)?;
    let mut stats = ImportStats {
        skipped: loaded.skipped,
        ..ImportStats::default()
    };

    for row in loaded.records {
        if let AttendanceStatus::Unrecognized(status) = AttendanceStatus::parse(&row.status) {
            warn!("importing {} with unrecognized attendance status {status:?}", row.email);
        }
        let course = course_id(pool, row.course_title.as_deref()).await?;
        let source_key = source_key_or_new(row.source_key);
        if insert_attendance(pool, &row.email, course, row.status.trim(), row.date, &source_key).await? {
            stats.inserted += 1;
        } else {
            stats.duplicates += 1;
        }
    }

    info!("attendance import from {}: {:?}", csv_path.display(), stats);
    Ok(stats)
}

pub async fn import_quiz_csv(pool: &PgPool, csv_path: &Path) -> anyhow::Result<ImportStats> {
    let file = source::open(csv_path)?;
    let loaded = source::read_rows::<QuizRow, _>(file)?;
    let mut stats = ImportStats {
        skipped: loaded.skipped,
        ..ImportStats::default()
    };

    for row in loaded.records {
        let course = course_id(pool, row.course_title.as_deref()).await?;
        let source_key = source_key_or_new(row.source_key);
        let inserted = insert_quiz_attempt(
            pool,
            &row.email,
            course,
            &row.quiz_title,
            row.score.as_deref(),
            row.submitted_at,
            &source_key,
        )
        .await?;
        if inserted {
            stats.inserted += 1;
        } else {
            stats.duplicates += 1;
        }
    }

    info!("quiz import from {}: {:?}", csv_path.display(), stats);
    Ok(stats)
}
