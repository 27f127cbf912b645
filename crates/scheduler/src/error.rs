use autopost_core_types::CoreError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("timer dispatcher stopped")]
    Stopped,
    #[error("invalid schedule for '{name}': {reason}")]
    InvalidSchedule { name: String, reason: String },
}

impl From<SchedulerError> for CoreError {
    fn from(value: SchedulerError) -> Self {
        CoreError::new(format!("scheduler error: {value}"))
    }
}
