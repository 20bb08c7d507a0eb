use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Invalid monitor setting '{setting}': {reason}")]
    InvalidSetting { setting: &'static str, reason: String },
}
