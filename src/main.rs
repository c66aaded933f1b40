use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use lms_insights::aggregate::{self, Granularity};
use lms_insights::config::Settings;
use lms_insights::models::{AttendanceRecord, QuizAttempt};
use lms_insights::report::{self, DashboardInput};
use lms_insights::{db, score, source};

#[derive(Parser)]
#[command(name = "lms-insights")]
#[command(about = "Attendance and quiz analytics for LMS course data", long_about = None)]
struct Cli {
    /// Optional TOML settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ScopeArgs {
    /// Only include this learner
    #[arg(long)]
    email: Option<String>,
    /// Only include this course title
    #[arg(long)]
    course: Option<String>,
    /// Window size in days (defaults to the config value)
    #[arg(long)]
    since_days: Option<i64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import attendance and quiz attempts from CSV exports
    Import {
        #[arg(long)]
        attendance: Option<PathBuf>,
        #[arg(long)]
        quizzes: Option<PathBuf>,
    },
    /// Normalize a single raw score value
    Score {
        raw: String,
    },
    /// Attendance summary per course
    Attendance {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Quiz averages per course
    Quizzes {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Generate a report from the database
    Report {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
        #[arg(long, value_enum)]
        granularity: Option<Granularity>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate a report from CSV exports without a database
    Summarize {
        #[arg(long)]
        attendance: Option<PathBuf>,
        #[arg(long)]
        quizzes: Option<PathBuf>,
        #[arg(long)]
        since_days: Option<i64>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
        #[arg(long, value_enum)]
        granularity: Option<Granularity>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

async fn connect(settings: &Settings) -> anyhow::Result<PgPool> {
    let database_url = settings.require_database_url()?;
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

fn scope_from(args: ScopeArgs, settings: &Settings) -> db::Scope {
    db::Scope {
        since: aggregate::cutoff_date(args.since_days.unwrap_or(settings.since_days)),
        email: args.email,
        course: args.course,
    }
}

fn emit(rendered: String, out: Option<PathBuf>) -> anyhow::Result<()> {
    match out {
        Some(path) => {
            std::fs::write(&path, rendered)
                .with_context(|| format!("writing report to {}", path.display()))?;
            println!("Report written to {}.", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

fn render(
    input: DashboardInput<'_>,
    format: OutputFormat,
    top_courses: usize,
) -> anyhow::Result<String> {
    let dashboard = report::build_dashboard(input);
    match format {
        OutputFormat::Markdown => Ok(report::render_markdown(&dashboard, top_courses)),
        OutputFormat::Json => report::render_json(&dashboard),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let settings = Settings::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect(&settings).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(&settings).await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import {
            attendance,
            quizzes,
        } => {
            if attendance.is_none() && quizzes.is_none() {
                anyhow::bail!("nothing to import: pass --attendance and/or --quizzes");
            }
            let pool = connect(&settings).await?;
            if let Some(path) = attendance {
                let stats = db::import_attendance_csv(&pool, &path).await?;
                println!(
                    "Inserted {} attendance rows from {} ({} already present, {} unreadable).",
                    stats.inserted,
                    path.display(),
                    stats.duplicates,
                    stats.skipped
                );
            }
            if let Some(path) = quizzes {
                let stats = db::import_quiz_csv(&pool, &path).await?;
                println!(
                    "Inserted {} quiz attempts from {} ({} already present, {} unreadable).",
                    stats.inserted,
                    path.display(),
                    stats.duplicates,
                    stats.skipped
                );
            }
        }
        Commands::Score { raw } => {
            let normalized = score::parse_score_text(Some(&raw));
            println!("display: {}", normalized.display_text);
            println!(
                "percentage: {}",
                report::format_percentage(normalized.percentage)
            );
        }
        Commands::Attendance { scope } => {
            let pool = connect(&settings).await?;
            let scope = scope_from(scope, &settings);
            let records = db::fetch_attendance(&pool, &scope).await?;

            if records.is_empty() {
                println!("No attendance found for this window.");
                return Ok(());
            }

            let overall = aggregate::summarize_attendance(&records);
            println!(
                "Attendance since {}: {}% present across {} sessions",
                scope.since, overall.percentage, overall.total
            );
            for course in aggregate::attendance_by_course(&records, &settings.unknown_course_label)
                .iter()
                .take(settings.top_courses)
            {
                println!(
                    "- {}: {}% ({} present, {} late, {} absent)",
                    course.course,
                    course.summary.percentage,
                    course.summary.present,
                    course.summary.late,
                    course.summary.absent
                );
            }
        }
        Commands::Quizzes { scope } => {
            let pool = connect(&settings).await?;
            let scope = scope_from(scope, &settings);
            let attempts = db::fetch_quiz_attempts(&pool, &scope).await?;

            if attempts.is_empty() {
                println!("No quiz attempts found for this window.");
                return Ok(());
            }

            let overall = aggregate::summarize_quiz_attempts(&attempts);
            println!(
                "Quiz average since {}: {:.1}% across {} graded attempts",
                scope.since, overall.average, overall.attended
            );
            for course in aggregate::quizzes_by_course(&attempts, &settings.unknown_course_label)
                .iter()
                .take(settings.top_courses)
            {
                println!(
                    "- {}: {:.1}% ({} of {} attempts graded)",
                    course.course, course.summary.average, course.summary.attended, course.attempts
                );
            }
        }
        Commands::Report {
            scope,
            format,
            granularity,
            out,
        } => {
            let pool = connect(&settings).await?;
            let scope = scope_from(scope, &settings);
            let attendance = db::fetch_attendance(&pool, &scope).await?;
            let attempts = db::fetch_quiz_attempts(&pool, &scope).await?;
            let clicks = db::fetch_link_clicks(&pool, &scope).await?;

            let label = scope.email.as_deref().or(scope.course.as_deref());
            let rendered = render(
                DashboardInput {
                    scope: label,
                    since: scope.since,
                    granularity: granularity.unwrap_or(settings.granularity),
                    unknown_course_label: &settings.unknown_course_label,
                    attendance: &attendance,
                    attempts: &attempts,
                    clicks: &clicks,
                },
                format,
                settings.top_courses,
            )?;
            emit(rendered, out)?;
        }
        Commands::Summarize {
            attendance,
            quizzes,
            since_days,
            format,
            granularity,
            out,
        } => {
            let mut attendance_records = Vec::new();
            let mut attempts = Vec::new();

            if let Some(path) = attendance {
                let loaded = source::load_attendance(&path)?;
                info!(
                    "loaded {} attendance rows from {} ({} skipped)",
                    loaded.records.len(),
                    path.display(),
                    loaded.skipped
                );
                attendance_records = loaded.records;
            }
            if let Some(path) = quizzes {
                let loaded = source::load_quiz_attempts(&path)?;
                info!(
                    "loaded {} quiz attempts from {} ({} skipped)",
                    loaded.records.len(),
                    path.display(),
                    loaded.skipped
                );
                attempts = loaded.records;
            }

            let cutoff = since_days.map(aggregate::cutoff_date);
            if let Some(cutoff) = cutoff {
                attendance_records.retain(|record| record.date >= cutoff);
                attempts.retain(|attempt| attempt.submitted_at.date_naive() >= cutoff);
            }
            let since = cutoff.unwrap_or_else(|| {
                earliest_date(&attendance_records, &attempts)
                    .unwrap_or_else(|| Utc::now().date_naive())
            });

            let rendered = render(
                DashboardInput {
                    scope: None,
                    since,
                    granularity: granularity.unwrap_or(settings.granularity),
                    unknown_course_label: &settings.unknown_course_label,
                    attendance: &attendance_records,
                    attempts: &attempts,
                    clicks: &[],
                },
                format,
                settings.top_courses,
            )?;
            emit(rendered, out)?;
        }
    }

    Ok(())
}

fn earliest_date(attendance: &[AttendanceRecord], attempts: &[QuizAttempt]) -> Option<NaiveDate> {
    attendance
        .iter()
        .map(|record| record.date)
        .chain(attempts.iter().map(|attempt| attempt.submitted_at.date_naive()))
        .min()
}
