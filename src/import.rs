//! Bulk import — newline-delimited task contents.
//!
//! Each line shaped like `{...}` is one task content. Other lines (blank
//! lines, comments, headers) are skipped. One bad record rejects the whole
//! file.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::error::ImportError;
use crate::store::TaskStore;
use crate::tasks::model::parse_content;

static RECORD_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{.*\}$").expect("valid record regex"));

/// Parse every record line of `text` into a task content.
pub fn parse_lines(text: &str) -> Result<Vec<serde_json::Value>, ImportError> {
    let mut contents = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if !RECORD_LINE.is_match(line) {
            debug!(line = idx + 1, "Skipping non-record line");
            continue;
        }
        let content = parse_content(line).map_err(|e| ImportError::Parse {
            line: idx + 1,
            reason: e.to_string(),
        })?;
        contents.push(content);
    }
    Ok(contents)
}

/// Enqueue every record of the file at `path` under `tag`, all or nothing.
pub async fn import_file(
    store: &dyn TaskStore,
    tag: &str,
    path: &Path,
) -> Result<usize, ImportError> {
    let text = tokio::fs::read_to_string(path).await?;
    let contents = parse_lines(&text)?;
    let count = store.create_tasks(tag, &contents).await?;
    info!(tag = %tag, path = %path.display(), count, "Tasks imported");
    Ok(count)
}
