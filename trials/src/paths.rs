//! Cross-platform application paths

use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self, String> {
        let data_dir = Self::get_data_dir()?;
        Self::at(data_dir)
    }

    /// Use `data_dir` instead of the platform default.
    pub fn at(data_dir: impl Into<PathBuf>) -> Result<Self, String> {
        let data_dir = data_dir.into();

        // Ensure directory exists
        fs::create_dir_all(&data_dir)
            .map_err(|e| format!("Failed to create data directory: {}", e))?;

        Ok(Self { data_dir })
    }

    fn get_data_dir() -> Result<PathBuf, String> {
        let base = dirs::data_dir().ok_or("Could not determine data directory")?;
        Ok(base.join("cloop"))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// One subdirectory per trial id.
    pub fn runs_dir(&self) -> PathBuf {
        self.data_dir.join("runs")
    }

    /// Optional persistent run configuration.
    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::at(dir.path().join("cloop")).unwrap();
        assert!(paths.data_dir().is_dir());
        assert_eq!(paths.runs_dir(), dir.path().join("cloop").join("runs"));
        assert_eq!(paths.config_file(), dir.path().join("cloop").join("config.json"));
    }
}
