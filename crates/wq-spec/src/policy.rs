use serde::{Deserialize, Serialize};

/// How a task's input is carved into elements.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StartPolicyKind {
    /// One element per input block.
    Block,
    /// One aggregate element for the whole input dataset.
    Dataset,
    /// No input; total events sliced into fixed-size elements.
    MonteCarlo,
    /// Exactly one element for the task.
    Single,
}

/// How child outcomes are folded into the parent element.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EndPolicyKind {
    #[default]
    SingleShot,
}

pub const DEFAULT_FAILURE_THRESHOLD: f64 = 0.1;
pub const DEFAULT_SLICE_SIZE: u32 = 500;

/// Policy section of a workload specification.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PolicySettings {
    #[serde(default)]
    pub start: Option<StartPolicyKind>,
    #[serde(default)]
    pub end: EndPolicyKind,
    /// Fraction of failed jobs above which the parent is failed.
    #[serde(default)]
    pub failure_threshold: Option<f64>,
    /// Maximum jobs per Monte Carlo element.
    #[serde(default)]
    pub slice_size: Option<u32>,
}

impl PolicySettings {
    pub fn failure_threshold(&self) -> f64 {
        self.failure_threshold.unwrap_or(DEFAULT_FAILURE_THRESHOLD)
    }

    pub fn slice_size(&self) -> u32 {
        self.slice_size.unwrap_or(DEFAULT_SLICE_SIZE)
    }
}
