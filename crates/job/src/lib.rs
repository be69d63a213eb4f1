use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use getset::Getters;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sqlx::FromRow;
use thiserror::Error;

/// Printer destinations accepted by the dispatcher. Anything else never reaches the print command.
static QUEUE_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+$").expect("queue name pattern is a valid regex")
});

/// Lifecycle state of a print job.
///
/// `pending` jobs are eligible for claiming, `processing` jobs belong to
/// whoever claimed them, `sent` is terminal and `error` stays put until an
/// operator redispatches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Sent,
    Error,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Sent => "sent",
            JobState::Error => "error",
        }
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown job state '{0}'")]
pub struct UnknownJobState(pub String);

impl FromStr for JobState {
    type Err = UnknownJobState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "sent" => Ok(JobState::Sent),
            "error" => Ok(JobState::Error),
            other => Err(UnknownJobState(other.to_string())),
        }
    }
}

impl TryFrom<String> for JobState {
    type Error = UnknownJobState;

    fn try_from(value: String) -> Result<Self, UnknownJobState> {
        value.parse()
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid queue name '{0}', expected only letters, digits, '_', '.' or '-'")]
pub struct InvalidQueueName(pub String);

/// A printer queue name that matched `[A-Za-z0-9_.-]+`.
///
/// The dispatcher only accepts this type, so a name coming from the database
/// has to go through [`QueueName::parse`] before it can be printed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueName(String);

impl QueueName {
    pub fn parse(value: &str) -> Result<Self, InvalidQueueName> {
        if QUEUE_NAME_PATTERN.is_match(value) {
            Ok(QueueName(value.to_string()))
        } else {
            Err(InvalidQueueName(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for QueueName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for QueueName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// `Job` is one printable ticket ("comanda") as stored in the `jobs` table.
#[derive(FromRow, Getters, Debug, Clone, PartialEq, Eq, Builder)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), pattern = "owned")]
pub struct Job {
    #[builder(default)]
    id: i64,
    /// Order that produced this job
    #[builder(default)]
    order_id: i64,
    /// Destination printer, stored as received and validated before every dispatch
    #[builder(default, setter(into))]
    queue_name: String,
    /// Text sent verbatim to the printer
    #[builder(default, setter(into))]
    payload: String,
    #[sqlx(try_from = "String")]
    #[builder(default = "JobState::Pending")]
    state: JobState,
    /// Dispatch attempts so far, incremented when the job is claimed
    #[builder(default)]
    attempts: i32,
    /// Last dispatch failure, or the reason the job went back to pending
    #[builder(default, setter(strip_option, into))]
    last_error: Option<String>,
    #[builder(default = "Utc::now()")]
    created_at: DateTime<Utc>,
    /// Time of the last successful send
    #[builder(default, setter(strip_option))]
    sent_at: Option<DateTime<Utc>>,
    /// When the job was last claimed, cleared when it leaves `processing`
    #[builder(default, setter(strip_option))]
    locked_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a new builder for constructing a `Job`.
    pub fn builder() -> JobBuilder {
        JobBuilder::default()
    }

    /// Whether a `processing` job was claimed at least `stale_after` before `now`.
    ///
    /// Jobs in any other state, or claimed without a timestamp, count as stale.
    pub fn is_stale(&self, stale_after: std::time::Duration, now: DateTime<Utc>) -> bool {
        if self.state != JobState::Processing || stale_after.is_zero() {
            return true;
        }
        match self.locked_at {
            Some(locked_at) => now
                .signed_duration_since(locked_at)
                .to_std()
                .is_ok_and(|age| age >= stale_after),
            None => true,
        }
    }

    /// Validated destination of this job.
    pub fn queue(&self) -> Result<QueueName, InvalidQueueName> {
        QueueName::parse(&self.queue_name)
    }
}

impl JobBuilder {
    /// Builds the Job with all configured values.
    pub fn build(self) -> Job {
        self.build_internal()
            .expect("All fields have defaults, build should never fail")
    }
}

/// Number of jobs of one order in each reportable state.
///
/// `processing` jobs are not reported, a job in flight is neither sent nor
/// failed yet.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrintStatus {
    pub sent: i64,
    pub pending: i64,
    pub error: i64,
}

impl PrintStatus {
    pub fn total(&self) -> i64 {
        self.sent + self.pending + self.error
    }
}
