pub mod db;
pub mod migrations;
pub mod models;

pub use db::Database;
pub use models::{ClassificationRecord, ClassificationResult, Label, PolicyRecord, KID_THRESHOLD};
