pub mod artifact;
pub mod checker;
pub mod config;
pub mod coordinator;
pub mod job;
pub mod matcher;
pub mod problem;
pub mod protocol;
pub mod sandbox;
pub mod worker;

pub fn create_timestamp() -> String {
    use chrono::{SecondsFormat, Utc};
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
