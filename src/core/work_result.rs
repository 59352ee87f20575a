//! Persisted record of one unit of work.
//!
//! Layout of a work directory:
//!
//! | File          | Contents                                   |
//! |---------------|--------------------------------------------|
//! | `work.json`   | snapshot of the [`WorkDescriptor`]         |
//! | `status.json` | the [`WorkStatus`] document                |
//! | `log.txt`     | append-only log, one timestamped line each |

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::descriptor::present_value;
use crate::core::{LogLine, SchedulerError, WorkDescriptor, WorkResponse};
use crate::util::clock::log_timestamp;

/// Descriptor snapshot file name.
pub const DESCRIPTOR_FILE: &str = "work.json";
/// Status document file name.
pub const STATUS_FILE: &str = "status.json";
/// Log file name.
pub const LOG_FILE: &str = "log.txt";

/// Status document of a unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkStatus {
    /// When the worker began the unit.
    pub started: DateTime<Utc>,
    /// When the unit was closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
    /// Value produced by a successful run. `Some(Null)` and `None` stay distinct on disk.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub response: Option<Value>,
    /// Failure message of an unsuccessful run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

impl WorkStatus {
    fn started_now() -> Self {
        Self {
            started: Utc::now(),
            completed: None,
            response: None,
            exception: None,
        }
    }

    /// Whether the unit has been closed.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed.is_some()
    }

    /// The final response recorded by `close`.
    #[must_use]
    pub fn response(&self) -> WorkResponse {
        WorkResponse {
            result: self.response.clone(),
            exception: self.exception.clone(),
        }
    }
}

/// Serialized form of a [`WorkResult`] as handed to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResultData {
    /// Originating descriptor.
    pub descriptor: WorkDescriptor,
    /// Status document.
    pub status: WorkStatus,
    /// Full log text.
    pub log: String,
}

impl WorkResultData {
    /// Uuid of the unit of work.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.descriptor.uuid
    }

    /// Final response of the unit.
    #[must_use]
    pub fn response(&self) -> WorkResponse {
        self.status.response()
    }

    /// Read a work directory written by [`WorkResult`].
    ///
    /// # Errors
    ///
    /// Fails if any of the three files is missing or malformed.
    pub fn read_from_dir(work_dir: &Path) -> Result<Self, SchedulerError> {
        let descriptor = serde_json::from_str(&fs::read_to_string(work_dir.join(DESCRIPTOR_FILE))?)?;
        let status = serde_json::from_str(&fs::read_to_string(work_dir.join(STATUS_FILE))?)?;
        let log = fs::read_to_string(work_dir.join(LOG_FILE))?;
        Ok(Self {
            descriptor,
            status,
            log,
        })
    }
}

/// Lifecycle record of one unit of work, backed by a work directory.
///
/// Mutated only by the tracker that owns it; closed exactly once.
#[derive(Debug)]
pub struct WorkResult {
    work_dir: PathBuf,
    descriptor: WorkDescriptor,
    status: WorkStatus,
    log_text: String,
    /// `None` once closed.
    log_file: Option<File>,
}

impl WorkResult {
    /// Create the work directory, snapshot the descriptor, write the initial status and open
    /// the log.
    ///
    /// # Errors
    ///
    /// Fails on any file system or encoding error.
    pub fn initialise(
        work_dir: impl Into<PathBuf>,
        descriptor: WorkDescriptor,
    ) -> Result<Self, SchedulerError> {
        let work_dir = work_dir.into();
        fs::create_dir_all(&work_dir)?;
        let status = WorkStatus::started_now();
        write_json(&work_dir.join(DESCRIPTOR_FILE), &descriptor)?;
        write_json(&work_dir.join(STATUS_FILE), &status)?;
        let log_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(work_dir.join(LOG_FILE))?;

        Ok(Self {
            work_dir,
            descriptor,
            status,
            log_text: String::new(),
            log_file: Some(log_file),
        })
    }

    /// Re-materialize a result from its serialized form into `work_dir`.
    ///
    /// # Errors
    ///
    /// Fails on any file system or encoding error.
    pub fn deserialize_from_scheduler(
        work_dir: impl Into<PathBuf>,
        data: WorkResultData,
    ) -> Result<Self, SchedulerError> {
        let work_dir = work_dir.into();
        fs::create_dir_all(&work_dir)?;
        write_json(&work_dir.join(DESCRIPTOR_FILE), &data.descriptor)?;
        write_json(&work_dir.join(STATUS_FILE), &data.status)?;
        fs::write(work_dir.join(LOG_FILE), data.log.as_bytes())?;

        let log_file = if data.status.is_completed() {
            None
        } else {
            Some(OpenOptions::new().append(true).open(work_dir.join(LOG_FILE))?)
        };

        Ok(Self {
            work_dir,
            descriptor: data.descriptor,
            status: data.status,
            log_text: data.log,
            log_file,
        })
    }

    /// Serialized form carrying descriptor, status and the full log text.
    #[must_use]
    pub fn serialize_for_scheduler(&self) -> WorkResultData {
        WorkResultData {
            descriptor: self.descriptor.clone(),
            status: self.status.clone(),
            log: self.log_text.clone(),
        }
    }

    /// Append one line stamped with the current time.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidState` once closed, or an I/O error.
    pub fn append_work_log(&mut self, message: &str) -> Result<(), SchedulerError> {
        self.append_at(Utc::now(), message)
    }

    /// Append a line captured earlier, keeping its capture time.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidState` once closed, or an I/O error.
    pub fn append_captured(&mut self, line: &LogLine) -> Result<(), SchedulerError> {
        self.append_at(line.captured_at, &line.message)
    }

    fn append_at(&mut self, at: DateTime<Utc>, message: &str) -> Result<(), SchedulerError> {
        let Some(file) = self.log_file.as_mut() else {
            return Err(SchedulerError::InvalidState(format!(
                "log of {} is closed",
                self.descriptor.uuid
            )));
        };
        let line = format!("{} {message}\n", log_timestamp(at));
        file.write_all(line.as_bytes())?;
        self.log_text.push_str(&line);
        Ok(())
    }

    /// Record completion time and response, and close the log.
    ///
    /// Nothing changes in memory unless the status document was written; a failed close
    /// leaves the result open.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidState` if already closed, or an I/O error.
    pub fn close(&mut self, response: WorkResponse) -> Result<(), SchedulerError> {
        if self.status.is_completed() {
            return Err(SchedulerError::InvalidState(format!(
                "work result {} closed twice",
                self.descriptor.uuid
            )));
        }
        let status = WorkStatus {
            completed: Some(Utc::now()),
            response: response.result,
            exception: response.exception,
            ..self.status.clone()
        };
        if let Some(file) = self.log_file.as_mut() {
            file.flush()?;
        }
        write_json(&self.work_dir.join(STATUS_FILE), &status)?;
        self.status = status;
        self.log_file = None;
        Ok(())
    }

    /// Whether `close` has been called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.status.is_completed()
    }

    /// Originating descriptor.
    #[must_use]
    pub const fn descriptor(&self) -> &WorkDescriptor {
        &self.descriptor
    }

    /// Status document.
    #[must_use]
    pub const fn status(&self) -> &WorkStatus {
        &self.status
    }

    /// Log text written so far.
    #[must_use]
    pub fn log_text(&self) -> &str {
        &self.log_text
    }

    /// Directory backing this result.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SchedulerError> {
    let body = serde_json::to_string_pretty(value)?;
    fs::write(path, body)?;
    Ok(())
}
