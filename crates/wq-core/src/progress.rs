use serde::{Deserialize, Serialize};

/// Progress triple reported by the execution layer and pushed to parent queues.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    pub percent_complete: u8,
    pub percent_success: u8,
    pub files_processed: u64,
}

/// Partial progress observation; absent fields leave the stored value alone.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressUpdate {
    #[serde(default)]
    pub percent_complete: Option<u8>,
    #[serde(default)]
    pub percent_success: Option<u8>,
    #[serde(default)]
    pub files_processed: Option<u64>,
}

impl ProgressUpdate {
    pub fn is_empty(&self) -> bool {
        self.percent_complete.is_none() && self.percent_success.is_none() && self.files_processed.is_none()
    }
}

impl From<Progress> for ProgressUpdate {
    fn from(p: Progress) -> Self {
        Self {
            percent_complete: Some(p.percent_complete),
            percent_success: Some(p.percent_success),
            files_processed: Some(p.files_processed),
        }
    }
}

impl Progress {
    /// Fold an observation into the current values.
    ///
    /// Every field only grows, percentages are capped at 100 and success never exceeds
    /// completion. Because the stored success is already bounded by the stored
    /// completion, the cap on success can never lower it.
    pub fn merge(&self, update: &ProgressUpdate) -> Progress {
        let complete = update
            .percent_complete
            .map(|v| v.min(100))
            .unwrap_or(0)
            .max(self.percent_complete);
        let success = update
            .percent_success
            .map(|v| v.min(100))
            .unwrap_or(0)
            .max(self.percent_success)
            .min(complete);
        let files = update.files_processed.unwrap_or(0).max(self.files_processed);
        Progress {
            percent_complete: complete,
            percent_success: success,
            files_processed: files,
        }
    }

    /// Job-weighted aggregate of several progress records.
    ///
    /// Elements with zero jobs still count as one job so a parent of empty children
    /// does not divide by zero.
    pub fn weighted<'a>(parts: impl IntoIterator<Item = (u32, &'a Progress)>) -> Progress {
        let mut jobs_total: u64 = 0;
        let mut complete: u64 = 0;
        let mut success: u64 = 0;
        let mut files: u64 = 0;
        for (jobs, p) in parts {
            let w = u64::from(jobs.max(1));
            jobs_total += w;
            complete += w * u64::from(p.percent_complete);
            success += w * u64::from(p.percent_success);
            files += p.files_processed;
        }
        if jobs_total == 0 {
            return Progress::default();
        }
        let percent_complete = (complete / jobs_total) as u8;
        let percent_success = ((success / jobs_total) as u8).min(percent_complete);
        Progress {
            percent_complete,
            percent_success,
            files_processed: files,
        }
    }
}
