//! `controller.datetime.txt` persistence: a plain-text
//! `host=ISO8601` file recording the last successful `fetch` per host, so
//! the next run is incremental.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};

pub fn load(path: &Path) -> HashMap<String, DateTime<Utc>> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return HashMap::new();
    };
    text.lines()
        .filter_map(|line| {
            let (host, ts) = line.split_once('=')?;
            let parsed = DateTime::parse_from_rfc3339(ts.trim()).ok()?;
            Some((host.trim().to_string(), parsed.with_timezone(&Utc)))
    })
        .collect()
}

/// Atomic write: write to a sibling temp file, then rename over `path`, so a
/// crash mid-write never leaves a truncated file.
pub fn save(path: &Path, entries: &HashMap<String, DateTime<Utc>>) -> std::io::Result<()> {
    let mut lines: Vec<String> = entries.iter().map(|(h, t)| format!("{h}={}", t.to_rfc3339())).collect();
    lines.sort();
    let mut body = lines.join("\n");
    body.push('\n');

    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, body)?;
    std::fs::rename(&tmp_path, path)
}
