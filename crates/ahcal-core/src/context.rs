//! Run-level configuration and conditions.

use serde::Deserialize;

/// The `run` section of the job configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Input file path.
    pub input: String,
    /// Output file path.
    pub output: String,
    /// Log file path; empty logs to stdout.
    pub log_file: String,
    /// Log level name: `debug`, `info`, `warn` or `error`.
    pub log_level: String,
    /// Number of events to process; -1 means until end of input.
    #[serde(rename = "nEvents", default = "default_n_events")]
    pub n_events: i64,
    /// Run number, used for multi-input output naming.
    #[serde(rename = "runNumber", default)]
    pub run_number: i32,
    /// Pool index, used for multi-input output naming.
    #[serde(rename = "poolIndex", default)]
    pub pool_index: i32,
    /// Whether the input is simulated data.
    #[serde(rename = "MC", default)]
    pub mc: bool,
}

fn default_n_events() -> i64 {
    -1
}

/// Condition data shared by all algorithms of a run.
#[derive(Debug, Clone)]
pub struct Conditions {
    /// Layers known to be absent or dead for this run period.
    pub skip_layers: Vec<i32>,
}

impl Default for Conditions {
    fn default() -> Self {
        Self {
            skip_layers: vec![0, 2, 14],
        }
    }
}

/// Everything an algorithm may consult about the current run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Parsed `run` section.
    pub config: RunConfig,
    /// Run-period condition data.
    pub conditions: Conditions,
}

impl RunContext {
    /// Build a context from a parsed run configuration with default
    /// conditions.
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            conditions: Conditions::default(),
        }
    }
}
