use anyhow::{Context, Result};
use phlog_core::AcquisitionConfig;
use std::path::{Path, PathBuf};

/// `<config dir>/phlog/config.json`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("phlog").join("config.json"))
}

/// Reads the explicit file if given, else the default file if it exists,
/// else falls back to built-in defaults.
pub fn load(explicit: Option<&Path>) -> Result<AcquisitionConfig> {
    if let Some(path) = explicit {
        return read(path);
    }
    match default_path() {
        Some(path) if path.exists() => read(&path),
        _ => Ok(AcquisitionConfig::default()),
    }
}

fn read(path: &Path) -> Result<AcquisitionConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse(&text).with_context(|| format!("invalid configuration in {}", path.display()))
}

fn parse(text: &str) -> Result<AcquisitionConfig> {
    Ok(serde_json::from_str(text)?)
}

pub fn write_default(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(&AcquisitionConfig::default())?;
    std::fs::write(path, text + "\n")
        .with_context(|| format!("failed to write {}", path.display()))
}
