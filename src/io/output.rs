use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

/// Write the rendered report, replacing any previous report at `path`
pub fn write_report(path: &Path, document: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create file: {:?}", path))?;
    file.write_all(document.as_bytes())
        .with_context(|| format!("Failed to write report: {:?}", path))?;
    Ok(())
}
