use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::aggregate::{Granularity, UNKNOWN_COURSE};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub unknown_course_label: String,
    pub granularity: Granularity,
    pub top_courses: usize,
    pub since_days: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            unknown_course_label: UNKNOWN_COURSE.to_string(),
            granularity: Granularity::Day,
            top_courses: 10,
            since_days: 30,
        }
    }
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let settings: Settings = toml::from_str(contents)?;
        Ok(settings)
    }

    /// Settings from an optional file, with `DATABASE_URL` taking precedence.
    pub fn resolve(path: Option<&Path>) -> anyhow::Result<Self> {
        let settings = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        Ok(settings.apply_env(std::env::var("DATABASE_URL").ok()))
    }

    pub fn apply_env(mut self, database_url: Option<String>) -> Self {
        if let Some(url) = database_url {
            log::debug!("using DATABASE_URL from the environment");
            self.database_url = Some(url);
        }
        self
    }

    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set (or database_url in the config file)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let settings = Settings::parse("top_courses = 3\n").unwrap();
        assert_eq!(settings.top_courses, 3);
        assert_eq!(settings.max_connections, 5);
        assert_eq!(settings.unknown_course_label, UNKNOWN_COURSE);
        assert_eq!(settings.granularity, Granularity::Day);
        assert_eq!(settings.since_days, 30);
    }

    #[test]
    fn load_reads_toml_file() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"database_url = \"postgres://localhost/lms\"\ngranularity = \"week\"\nunknown_course_label = \"Unassigned\"\n",
        )
        .unwrap();
        let settings = Settings::load(temp.path()).unwrap();
        assert_eq!(settings.granularity, Granularity::Week);
        assert_eq!(settings.unknown_course_label, "Unassigned");
        assert_eq!(
            settings.require_database_url().unwrap(),
            "postgres://localhost/lms"
        );
    }

    #[test]
    fn environment_url_overrides_file_value() {
        let settings = Settings::parse("database_url = \"postgres://file/lms\"\n").unwrap();
        let overridden = settings
            .clone()
            .apply_env(Some("postgres://env/lms".to_string()));
        assert_eq!(overridden.require_database_url().unwrap(), "postgres://env/lms");

        let kept = settings.apply_env(None);
        assert_eq!(kept.require_database_url().unwrap(), "postgres://file/lms");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(Settings::parse("colour = \"blue\"\n").is_err());
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let settings = Settings::default();
        assert!(settings.require_database_url().is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Settings::load("/nonexistent/lms-insights.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/lms-insights.toml"));
    }
}
