use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};

use crate::llm::audio_mime_type;

/// One row of an exported email log.
///
/// Column names follow the English export; the Japanese headers of the
/// source spreadsheet are accepted as aliases. Cells may be strings,
/// numbers or null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EmailRow {
    #[serde(default, alias = "メール番号", deserialize_with = "lenient_string")]
    pub message_id: Option<String>,
    #[serde(default, alias = "日時", deserialize_with = "lenient_string")]
    pub timestamp: Option<String>,
    #[serde(default, alias = "担当者", deserialize_with = "lenient_string")]
    pub agent: Option<String>,
    #[serde(default, alias = "差出人", deserialize_with = "lenient_string")]
    pub counterpart: Option<String>,
    #[serde(default, alias = "件名", deserialize_with = "lenient_string")]
    pub subject: Option<String>,
    #[serde(default, alias = "本文", deserialize_with = "lenient_string")]
    pub body: Option<String>,
}

/// All rows of one email log, labelled for traceability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailSource {
    pub label: String,
    pub rows: Vec<EmailRow>,
}

/// Accept a string, a number (integral floats lose their `.0`) or null
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        }),
        Some(other) => Some(other.to_string()),
    })
}

/// Load an email log exported as a JSON array of row objects
pub fn load_email_file(path: &Path) -> Result<EmailSource> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    let label = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    parse_email_json(&label, &content)
}

/// Parse a JSON array of email rows
pub fn parse_email_json(label: &str, json: &str) -> Result<EmailSource> {
    let rows: Vec<EmailRow> =
        serde_json::from_str(json).with_context(|| format!("Failed to parse email log {}", label))?;
    Ok(EmailSource {
        label: label.to_string(),
        rows,
    })
}

/// List the audio files in a directory, sorted by path.
///
/// Only known audio extensions are returned; anything else in the directory
/// (transcripts, spreadsheets) is ignored. Sorting makes the order
/// independent of how the filesystem enumerates entries.
pub fn list_audio_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("Failed to read directory: {:?}", dir))?
    {
        let path = entry?.path();
        if path.is_file() && audio_mime_type(&path).is_some() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
