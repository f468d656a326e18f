use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{PolicySettings, StartPolicyKind};

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("read spec {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse spec yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid spec {spec}: {reason}")]
    Invalid { spec: String, reason: String },
    #[error("spec {0} not found")]
    NotFound(String),
}

/// A workload specification: one or more tasks to run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WmSpec {
    pub name: String,
    #[serde(default)]
    pub request_type: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub policy: PolicySettings,
    pub tasks: Vec<TaskSpec>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TaskSpec {
    pub name: String,
    #[serde(default)]
    pub input_dataset: Option<String>,
    pub splitting: Splitting,
    /// Events to generate for tasks without input.
    #[serde(default)]
    pub total_events: Option<u64>,
    #[serde(default)]
    pub site_whitelist: Vec<String>,
    #[serde(default)]
    pub site_blacklist: Vec<String>,
    #[serde(default)]
    pub block_whitelist: Vec<String>,
    #[serde(default)]
    pub block_blacklist: Vec<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "algorithm")]
pub enum Splitting {
    EventBased { events_per_job: u64 },
    FileBased { files_per_job: u64 },
}

impl Splitting {
    /// Estimated job count for a unit of input; a non-empty unit is at least one job.
    pub fn estimate_jobs(&self, num_events: u64, num_files: u64) -> u32 {
        let jobs = match *self {
            Splitting::EventBased { events_per_job } => div_ceil(num_events, events_per_job),
            Splitting::FileBased { files_per_job } => div_ceil(num_files, files_per_job),
        };
        let non_empty = num_events > 0 || num_files > 0;
        u32::try_from(jobs).unwrap_or(u32::MAX).max(u32::from(non_empty))
    }
}

fn div_ceil(n: u64, per: u64) -> u64 {
    if per == 0 {
        return 0;
    }
    n.div_ceil(per)
}

impl WmSpec {
    pub fn task_path(&self, task: &TaskSpec) -> String {
        format!("/{}/{}", self.name, task.name)
    }

    /// Look a task up by its full path (`/<spec>/<task>`) or bare name.
    pub fn task(&self, path: &str) -> Option<&TaskSpec> {
        let name = path.rsplit('/').next().unwrap_or(path);
        let prefix_ok = !path.starts_with('/') || path == format!("/{}/{}", self.name, name);
        if !prefix_ok {
            return None;
        }
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Start policy for a task: the spec's explicit choice, else Block for input
    /// datasets and MonteCarlo for generation.
    pub fn start_policy_for(&self, task: &TaskSpec) -> StartPolicyKind {
        self.policy.start.unwrap_or(if task.input_dataset.is_some() {
            StartPolicyKind::Block
        } else {
            StartPolicyKind::MonteCarlo
        })
    }

    fn invalid(&self, reason: impl Into<String>) -> SpecError {
        SpecError::Invalid {
            spec: self.name.clone(),
            reason: reason.into(),
        }
    }
}

pub fn load_spec(path: &Path) -> Result<WmSpec, SpecError> {
    let s = std::fs::read_to_string(path).map_err(|source| SpecError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_spec(&s)
}

pub fn parse_spec(yaml: &str) -> Result<WmSpec, SpecError> {
    let spec: WmSpec = serde_yaml::from_str(yaml)?;
    validate_spec(&spec)?;
    Ok(spec)
}

pub fn validate_spec(spec: &WmSpec) -> Result<(), SpecError> {
    if spec.name.trim().is_empty() || spec.name.contains('/') {
        return Err(spec.invalid("name must be non-empty and contain no '/'"));
    }
    if spec.tasks.is_empty() {
        return Err(spec.invalid("spec has no tasks"));
    }
    if let Some(t) = spec.policy.failure_threshold {
        if !(0.0..=1.0).contains(&t) {
            return Err(spec.invalid(format!("failure_threshold {t} outside [0, 1]")));
        }
    }
    if spec.policy.slice_size == Some(0) {
        return Err(spec.invalid("slice_size must be positive"));
    }

    let mut seen = HashSet::new();
    for task in &spec.tasks {
        if task.name.trim().is_empty() || task.name.contains('/') {
            return Err(spec.invalid("task name must be non-empty and contain no '/'"));
        }
        if !seen.insert(task.name.as_str()) {
            return Err(spec.invalid(format!("duplicate task {}", task.name)));
        }
        match task.splitting {
            Splitting::EventBased { events_per_job: 0 } | Splitting::FileBased { files_per_job: 0 } => {
                return Err(spec.invalid(format!("task {} has a zero-sized splitting unit", task.name)));
            }
            _ => {}
        }
        let needs_input = matches!(
            spec.start_policy_for(task),
            StartPolicyKind::Block | StartPolicyKind::Dataset
        );
        if needs_input && task.input_dataset.is_none() {
            return Err(spec.invalid(format!("task {} needs an input_dataset", task.name)));
        }
        if spec.start_policy_for(task) == StartPolicyKind::MonteCarlo {
            if task.total_events.unwrap_or(0) == 0 {
                return Err(spec.invalid(format!("task {} needs total_events", task.name)));
            }
            if !matches!(task.splitting, Splitting::EventBased { .. }) {
                return Err(spec.invalid(format!("task {} must split by events", task.name)));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RERECO: &str = r#"
name: ReReco_Run2023A
request_type: ReReco
priority: 90000
tasks:
  - name: DataProcessing
    input_dataset: /JetHT/Run2023A-v1/RAW
    splitting: { algorithm: EventBased, events_per_job: 1000 }
    site_whitelist: [T1_US_FNAL, T2_CH_CERN]
"#;

    #[test]
    fn parses_and_defaults_to_block_policy() {
        let spec = parse_spec(RERECO).unwrap();
        let task = &spec.tasks[0];
        assert_eq!(spec.task_path(task), "/ReReco_Run2023A/DataProcessing");
        assert_eq!(spec.start_policy_for(task), StartPolicyKind::Block);
        assert_eq!(spec.policy.failure_threshold(), 0.1);
        assert!(spec.task("/ReReco_Run2023A/DataProcessing").is_some());
        assert!(spec.task("DataProcessing").is_some());
        assert!(spec.task("/Other/DataProcessing").is_none());
    }

    #[test]
    fn monte_carlo_requires_total_events() {
        let yaml = r#"
name: MC
tasks:
  - name: Production
    splitting: { algorithm: EventBased, events_per_job: 100 }
"#;
        let err = parse_spec(yaml).unwrap_err();
        assert!(matches!(err, SpecError::Invalid { .. }), "{err}");
    }

    #[test]
    fn rejects_zero_splitting_unit() {
        let yaml = r#"
name: Bad
tasks:
  - name: T
    input_dataset: /A/B/RAW
    splitting: { algorithm: FileBased, files_per_job: 0 }
"#;
        assert!(parse_spec(yaml).is_err());
    }

    #[test]
    fn estimate_jobs_rounds_up() {
        let ev = Splitting::EventBased { events_per_job: 100 };
        assert_eq!(ev.estimate_jobs(250, 3), 3);
        assert_eq!(ev.estimate_jobs(0, 0), 0);
        let files = Splitting::FileBased { files_per_job: 2 };
        assert_eq!(files.estimate_jobs(0, 5), 3);
        assert_eq!(files.estimate_jobs(10, 0), 1);
    }
}
