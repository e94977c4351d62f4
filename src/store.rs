//! File-backed persistence for the job collections.
//!
//! Two JSON arrays on disk: `jobs.json` (live collection) and `dlq.json`
//! (dead letters). Every mutation rewrites the whole collection through a
//! temporary sibling followed by a rename, so a reader never observes a
//! partial write. The store does no locking of its own; callers (the
//! registry) serialize read-modify-write sequences.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::config::StoreConfig;
use crate::error::Result;
use crate::queue::Job;

#[derive(Debug, Clone)]
pub struct JobStore {
    data_dir: PathBuf,
    jobs_file: PathBuf,
    dlq_file: PathBuf,
}

impl JobStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            jobs_file: config.jobs_file(),
            dlq_file: config.dlq_file(),
        }
    }

    /// Read the live collection. A missing or empty file is the empty
    /// collection; an unreadable or unparseable file is an error.
    pub fn load_jobs(&self) -> Result<Vec<Job>> {
        read_collection(&self.jobs_file)
    }

    pub fn save_jobs(&self, jobs: &[Job]) -> Result<()> {
        self.write_collection(&self.jobs_file, jobs)
    }

    pub fn load_dlq(&self) -> Result<Vec<Job>> {
        read_collection(&self.dlq_file)
    }

    pub fn save_dlq(&self, jobs: &[Job]) -> Result<()> {
        self.write_collection(&self.dlq_file, jobs)
    }

    fn write_collection(&self, path: &Path, jobs: &[Job]) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(jobs)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn read_collection(path: &Path) -> Result<Vec<Job>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&text)?)
}
