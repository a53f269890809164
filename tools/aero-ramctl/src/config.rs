use std::fs;
use std::path::{Path, PathBuf};

use aero_ramdisk::{ControllerConfig, RamdiskConfig};
use anyhow::Context;
use serde::Deserialize;

/// Contents of the `--config` JSON file.
#[derive(Debug, Deserialize)]
pub struct RamctlConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    pub disks: Vec<DiskSpec>,
}

#[derive(Debug, Deserialize)]
pub struct DiskSpec {
    #[serde(flatten)]
    pub disk: RamdiskConfig,
    /// File whose contents seed the disk, relative to the config file.
    #[serde(default)]
    pub image: Option<PathBuf>,
}

impl RamctlConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parse config {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for spec in &mut config.disks {
            if let Some(image) = spec.image.as_mut() {
                if image.is_relative() {
                    *image = base.join(&*image);
                }
            }
        }
        Ok(config)
    }
}
