use std::path::Path;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// One entry of the rip queue. Immutable once loaded; queue order is rip
/// order, top of the file is the next disc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Catalog id, the unique tracking key across the pipeline
    pub clz_index: u32,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    /// "tt" + 7-8 digits, required for queue eligibility
    pub imdb_id: String,
}

#[derive(Debug, Deserialize)]
struct QueueFile {
    items: Vec<QueueItem>,
}

/// IMDb title ids look like tt0078748 (7 or 8 digits)
pub fn is_valid_imdb_id(id: &str) -> bool {
    match id.strip_prefix("tt") {
        Some(digits) => {
            (7..=8).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Load and validate the queue file: JSON with an "items" list
pub fn load_queue(path: &Path) -> Result<Vec<QueueItem>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read queue file: {}", path.display()))?;
    let parsed: QueueFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse queue file: {}", path.display()))?;

    for (n, item) in parsed.items.iter().enumerate() {
        if !is_valid_imdb_id(&item.imdb_id) {
            bail!(
                "queue item {} ({:?}) has an invalid IMDb id: {:?}",
                n + 1,
                item.title,
                item.imdb_id
            );
        }
    }

    Ok(parsed.items)
}
