use directories::ProjectDirs;
use eyre::ContextCompat as _;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct AirsignPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl AirsignPaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knobs.
        if let (Ok(data_dir), Ok(config_dir)) = (
            std::env::var("AIRSIGN_DATA_DIR"),
            std::env::var("AIRSIGN_CONFIG_DIR"),
        ) {
            return Ok(Self::from_dirs(
                PathBuf::from(config_dir),
                PathBuf::from(data_dir),
            ));
        }

        // macOS: ~/Library/Application Support/airsign
        // Linux: ~/.config/airsign
        // Windows: %APPDATA%\\airsign
        let proj =
            ProjectDirs::from("", "", "airsign").context("failed to resolve project dirs")?;
        Ok(Self::from_dirs(
            proj.config_dir().to_path_buf(),
            proj.data_dir().to_path_buf(),
        ))
    }

    pub fn from_dirs(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        let log_file = data_dir.join("airsign.log.jsonl");
        Self {
            config_dir,
            data_dir,
            log_file,
        }
    }

    pub fn secrets_dir(&self) -> PathBuf {
        self.config_dir.join("secrets")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.data_dir.join("audit.jsonl")
    }

    pub fn ensure_private_dirs(&self) -> eyre::Result<()> {
        crate::fsutil::ensure_private_dir(&self.config_dir)?;
        crate::fsutil::ensure_private_dir(&self.data_dir)?;
        Ok(())
    }
}
