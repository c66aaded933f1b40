//! Score normalization and attendance/quiz analytics for LMS course data.
//!
//! [`score`] and [`aggregate`] are pure and never fail; the remaining modules
//! load records from Postgres or CSV exports and render reports.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod models;
pub mod report;
pub mod score;
pub mod source;
