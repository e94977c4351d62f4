use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Lifecycle state of a job.
///
/// `Dead` records live only in the DLQ collection; the live collection
/// holds the other three states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Dead,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Dead => "dead",
        })
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "dead" => Ok(Self::Dead),
            other => Err(format!(
                "unknown state {other:?}, expected pending|processing|completed|dead"
            )),
        }
    }
}

/// Payload accepted by `enqueue`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobSpec {
    /// Explicit id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,

    /// Shell command to run. Required, must be non-empty.
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// One shell command plus its retry bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    /// Count of failed executions so far.
    pub attempts: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest claimable instant; `None` means eligible immediately.
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Combined stdout/stderr of the most recent execution.
    pub output: Option<String>,
}

impl Job {
    pub fn new(command: impl Into<String>, max_retries: u32) -> Self {
        Self::with_id(generate_id(), command, max_retries)
    }

    pub fn with_id(id: impl Into<String>, command: impl Into<String>, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            command: command.into(),
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            created_at: now,
            updated_at: now,
            next_run_at: None,
            last_error: None,
            output: None,
        }
    }

    /// Whether a claim at `now` may take this job.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.next_run_at.is_none_or(|t| t <= now)
    }
}

fn generate_id() -> String {
    format!("job-{}", Uuid::new_v4().as_simple())
}
