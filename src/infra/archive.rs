//! Archival of completed work under a rotating directory.
//!
//! With daily rotation, the first result archived on a calendar day (UTC) opens a fresh day
//! directory `YYYY-MM-DD`; if that name is already taken (e.g. by an earlier process run) the
//! next free `YYYY-MM-DD-1`, `YYYY-MM-DD-2`, ... is used. Each result lands in its own
//! `<uuid>` subdirectory, suffixed the same way on collision.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use tracing::{debug, info};

use crate::core::{SchedulerError, WorkResult, WorkResultData};

/// Writes completed work results to durable storage.
#[derive(Debug)]
pub struct WorkArchive {
    root: PathBuf,
    rotate_daily: bool,
    current: Option<(NaiveDate, PathBuf)>,
}

impl WorkArchive {
    /// Archive rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, rotate_daily: bool) -> Self {
        Self {
            root: root.into(),
            rotate_daily,
            current: None,
        }
    }

    /// Archive root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Archive `data` under today's directory and return the unit's directory.
    ///
    /// # Errors
    ///
    /// Fails on any file system or encoding error.
    pub fn archive(&mut self, data: WorkResultData) -> Result<PathBuf, SchedulerError> {
        self.archive_on(Utc::now().date_naive(), data)
    }

    /// Archive `data` as if today were `today`.
    ///
    /// # Errors
    ///
    /// Fails on any file system or encoding error.
    pub fn archive_on(
        &mut self,
        today: NaiveDate,
        data: WorkResultData,
    ) -> Result<PathBuf, SchedulerError> {
        let dir = self.directory_for(today)?;
        let name = if data.uuid().is_empty() {
            "unnamed"
        } else {
            data.uuid()
        };
        let work_dir = unique_path(&dir.join(name));
        WorkResult::deserialize_from_scheduler(&work_dir, data)?;
        debug!(dir = %work_dir.display(), "work archived");
        Ok(work_dir)
    }

    fn directory_for(&mut self, today: NaiveDate) -> Result<PathBuf, SchedulerError> {
        if !self.rotate_daily {
            std::fs::create_dir_all(&self.root)?;
            return Ok(self.root.clone());
        }
        if let Some((date, dir)) = &self.current {
            if *date == today {
                return Ok(dir.clone());
            }
        }
        let dir = unique_path(&self.root.join(today.format("%Y-%m-%d").to_string()));
        std::fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "archive rotated");
        self.current = Some((today, dir.clone()));
        Ok(dir)
    }
}

/// `base` if free, otherwise the first free `base-1`, `base-2`, ...
fn unique_path(base: &Path) -> PathBuf {
    if !base.exists() {
        return base.to_path_buf();
    }
    let name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    (1..)
        .map(|n| base.with_file_name(format!("{name}-{n}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| base.to_path_buf())
}
