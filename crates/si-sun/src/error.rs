use thiserror::Error;

/// A remote job that reached a terminal state other than `succeeded`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobError {
    pub job_id: String,
    pub status: String,
    pub exit_code: i32,
    pub error: String,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let job_id = if self.job_id.trim().is_empty() {
            "unknown-job"
        } else {
            self.job_id.trim()
        };
        let status = if self.status.trim().is_empty() {
            "unknown"
        } else {
            self.status.trim()
        };
        write!(
            f,
            "remote job {job_id} finished with status {status} (exit code {})",
            self.exit_code
        )?;
        if !self.error.trim().is_empty() {
            write!(f, ": {}", self.error.trim())?;
        }
        Ok(())
    }
}

impl std::error::Error for JobError {}

#[derive(Error, Debug)]
pub enum SunError {
    #[error("{0}")]
    Config(String),

    #[error("sun: {message} (status {status})")]
    Status { status: u16, message: String },

    #[error("sun request failed: {0}")]
    Network(String),

    #[error("sun payload invalid: {0}")]
    Decode(String),

    #[error("{0}")]
    Machine(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("settings error: {0}")]
    Settings(#[from] si_config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SunError {
    pub fn machine(message: impl Into<String>) -> Self {
        Self::Machine(message.into())
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Optimistic write lost against a newer revision.
    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(409)
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }
}

impl From<serde_json::Error> for SunError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_message_embeds_everything() {
        let err = JobError {
            job_id: "job-20260101-000000-abc".to_string(),
            status: "failed".to_string(),
            exit_code: 3,
            error: "command exited with code 3".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("job-20260101-000000-abc"));
        assert!(msg.contains("failed"));
        assert!(msg.contains("exit code 3"));
        assert!(msg.ends_with("command exited with code 3"));
    }

    #[test]
    fn test_status_kinds() {
        let conflict = SunError::Status {
            status: 409,
            message: "revision conflict".to_string(),
        };
        assert!(conflict.is_conflict());
        assert!(!conflict.is_not_found());
        assert_eq!(conflict.to_string(), "sun: revision conflict (status 409)");
        assert!(!SunError::machine("x").is_conflict());
    }
}
