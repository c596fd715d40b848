use std::fs;
use std::path::Path;

use chrono::Local;
use serde::{Deserialize, Serialize};

use super::challenge::{ChallengeDetail, ChallengeSummary, Tag};

pub const METADATA_FILE: &str = "challenge.json";

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ChallengeMetadata {
    pub id: u64,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub value: Option<i64>,
    #[serde(default)]
    pub connection_info: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    pub source_url: String,
    pub downloaded_at: String,
}

impl ChallengeMetadata {
    /// `files` holds the on-disk names the attachments were saved under.
    pub fn new(
        summary: &ChallengeSummary,
        detail: &ChallengeDetail,
        files: Vec<String>,
        source_url: String,
    ) -> Self {
        Self {
            id: detail.id,
            name: detail.name.clone(),
            category: detail.category.clone(),
            kind: summary.kind.clone(),
            value: detail.value.or(summary.value),
            connection_info: detail.connection_info.clone(),
            tags: detail.tags.iter().map(Tag::as_str).map(String::from).collect(),
            files,
            source_url,
            downloaded_at: Local::now().to_rfc3339(),
        }
    }
}

pub fn load(dir: &Path) -> Result<ChallengeMetadata, String> {
    let path = dir.join(METADATA_FILE);
    let content =
        fs::read_to_string(&path).map_err(|e| format!("Failed to read {}: {}", METADATA_FILE, e))?;

    serde_json::from_str(&content).map_err(|e| format!("Failed to parse {}: {}", METADATA_FILE, e))
}

pub fn save(dir: &Path, metadata: &ChallengeMetadata) -> Result<(), std::io::Error> {
    let path = dir.join(METADATA_FILE);
    let content = serde_json::to_string_pretty(metadata)?;
    fs::write(path, content)
}
