use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::Deserialize;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

pub const DEFAULT_DATA_FILE: &str = "tasks.json";

/// The JSON document holding the task forest.
#[derive(Debug, Clone)]
pub struct TaskStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
}

impl TaskStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        Self::open_with_file(data_dir, DEFAULT_DATA_FILE)
    }

    #[tracing::instrument(skip(data_dir))]
    pub fn open_with_file(data_dir: &Path, file_name: &str) -> anyhow::Result<Self> {
        if file_name.trim().is_empty() {
            return Err(anyhow!("data file name cannot be empty"));
        }
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tasks_path = data_dir.join(file_name);
        info!(
            data_dir = %data_dir.display(),
            tasks = %tasks_path.display(),
            "opened task store"
        );

        Ok(Self {
            data_dir,
            tasks_path,
        })
    }

    /// Raw file contents, or `None` when there is no file yet.
    #[tracing::instrument(skip(self))]
    pub fn read(&self) -> anyhow::Result<Option<String>> {
        match fs::read_to_string(&self.tasks_path) {
            Ok(text) => {
                debug!(file = %self.tasks_path.display(), bytes = text.len(), "read task file");
                Ok(Some(text))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err)
                .with_context(|| format!("failed reading {}", self.tasks_path.display())),
        }
    }

    /// Overwrites the file with `document`, via a temp file in the same
    /// directory so a crash never leaves half a document behind.
    #[tracing::instrument(skip(self, document))]
    pub fn write(&self, document: &Value) -> anyhow::Result<()> {
        let serialized =
            serde_json::to_string_pretty(document).context("failed to serialize tasks")?;
        debug!(file = %self.tasks_path.display(), bytes = serialized.len(), "saving task file atomically");

        let dir = self.tasks_path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
        temp.write_all(serialized.as_bytes())?;
        writeln!(temp)?;
        temp.flush()?;

        temp.persist(&self.tasks_path)
            .map_err(|err| anyhow!("failed to persist {}: {}", self.tasks_path.display(), err))?;
        Ok(())
    }
}

/// Parses file text into a JSON value. Shape checks are left to the tree.
///
/// Each task level nests two JSON levels; the depth cap is lifted so any
/// tree `write` produced reads back.
pub fn parse_document(text: &str) -> anyhow::Result<Value> {
    let mut de = serde_json::Deserializer::from_str(text);
    de.disable_recursion_limit();
    let document = Value::deserialize(&mut de).context("task file is not valid JSON")?;
    de.end().context("trailing data after task document")?;
    Ok(document)
}
