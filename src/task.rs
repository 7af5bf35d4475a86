//! File-based task hand-off.
//!
//! A client drops a task file into the `tasks` folder and waits for the
//! result to appear at `output/temp/temp.json`; a runner on the database side
//! picks the task up with [`run_task`].
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::{ReadOptions, Source};
use crate::frame::{Frame, Squeezed};
use crate::template::Params;
use crate::ts::Stopwatch;

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const TASK_FILE: &str = "task.json";

#[derive(Debug, Error)]
#[error("Timed out after {:?} waiting for '{}'", .timeout, .path.display())]
pub struct WaitTimeout {
    pub path: PathBuf,
    pub timeout: Duration,
}

/// A query to run on behalf of another process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Template name or inline SQL.
    pub query: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub options: ReadOptions,
}

impl Task {
    pub fn new(query: impl Into<String>, params: Params) -> Self {
        Self {
            query: query.into(),
            params,
            options: ReadOptions::default(),
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        if !path.is_file() {
            bail!("File '{}' does not exist or is not a file", path.display());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid task file {}", path.display()))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// Poll for `path` once per second until it exists or `timeout` passes.
pub async fn wait_for_file(path: &Path, timeout: Duration) -> Result<PathBuf> {
    let start = Instant::now();
    loop {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(WaitTimeout {
                path: path.to_path_buf(),
                timeout,
            }
            .into());
        }
        tokio::time::sleep(POLL_INTERVAL.min(timeout - elapsed)).await;
    }
}

/// Where runners write their result.
pub fn output_path(config: &Config) -> PathBuf {
    config
        .target_path("output")
        .unwrap_or_else(|_| PathBuf::from("output"))
        .join("temp")
        .join("temp.json")
}

/// Where clients drop their task.
pub fn task_path(config: &Config) -> Result<PathBuf> {
    let path = config.target_path("tasks")?;
    if path.extension().is_some() {
        Ok(path)
    } else {
        Ok(path.join(TASK_FILE))
    }
}

/// Hand `task` to a runner and wait for its result. The runner always
/// ships a full frame; `task.options.squeeze` is applied here.
pub async fn execute_from_task(config: &Config, task: &Task) -> Result<Squeezed> {
    let frame = exchange(task, &task_path(config)?, &output_path(config), DEFAULT_TIMEOUT).await?;
    Ok(task.options.squeeze(frame))
}

async fn exchange(task: &Task, task_path: &Path, out_path: &Path, timeout: Duration) -> Result<Frame> {
    task.write(task_path)?;
    debug!("Task written to {}", task_path.display());

    let result = match wait_for_file(out_path, timeout).await {
        Ok(path) => Frame::read_json(&path),
        Err(e) => Err(e),
    };

    for path in [task_path, out_path] {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
    result
}

/// Run the task at `task_path` against `source` and write the frame to
/// `out_path`.
pub async fn run_task(source: &Source, task_path: &Path, out_path: &Path) -> Result<Frame> {
    info!("Running task {}", task_path.display());
    let mut stopwatch = Stopwatch::new();

    let task = Task::read(task_path)?;
    debug!("Task: {}", serde_json::to_string_pretty(&task)?);

    let options = ReadOptions {
        squeeze: false,
        ..task.options.clone()
    };
    let frame = source
        .execute(task.query.as_str(), task.params.clone(), &options)
        .await?
        .into_frame();
    stopwatch.split("Query");
    frame.write(out_path)?;

    let (rows, cols) = frame.shape();
    info!("Retrieved: rows = {}, cols = {}", rows, cols);
    stopwatch.total();
    Ok(frame)
}
