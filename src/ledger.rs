use crate::error::Result;
use crate::export::ExportTask;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Submitted task handles, persisted so monitoring can resume in a later run.
#[derive(Deserialize, Serialize, Debug, Default)]
pub struct TaskLedger {
    pub project: String,
    pub tasks: Vec<ExportTask>,
}

impl TaskLedger {
    pub fn new(project: &str, tasks: Vec<ExportTask>) -> Self {
        Self {
            project: project.to_string(),
            tasks,
        }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let ledger: Self = serde_json::from_str(&content)?;
        Ok(ledger)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_ledger() -> TaskLedger {
        let tasks = (1..=3)
            .map(|i| ExportTask {
                id: format!("T{i}"),
                name: format!("projects/p/operations/T{i}"),
                description: format!("Landsat_Image_2017-01-01_{i}_20240101_120000"),
            })
            .collect();
        TaskLedger::new("p", tasks)
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tasks.json");
        mock_ledger().write(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_read_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        mock_ledger().write(&path).unwrap();

        let ledger = TaskLedger::read(&path).unwrap();
        assert_eq!(ledger.project, "p");
        assert_eq!(ledger.tasks.len(), 3);
        assert_eq!(ledger.tasks[2].name, "projects/p/operations/T3");
    }
}
