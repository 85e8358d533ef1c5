//! Report file parser and failure-summary classification.

use std::collections::HashMap;

/// One `key: value` record from a `.report` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportRecord {
    fields: HashMap<String, String>,
}

impl ReportRecord {
    fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// `result != "true"` — this record represents a failing run.
    pub fn is_failure(&self) -> bool {
        self.get("result") != Some("true")
    }

    /// Atom identifier this record refers to, if present.
    pub fn atom(&self) -> Option<&str> {
        self.get("atom")
    }

    /// One-line failure classification for a failing record.
    pub fn failure_summary(&self) -> String {
        if let Some(s) = self.get("failure_str") {
            return format!("special fail: {s}");
        }
        if self
            .get("features")
            .map(|f| f.split_whitespace().any(|tok| tok == "test"))
            .unwrap_or(false)
        {
            return "test run failed".to_string();
        }
        if let Some(flags) = self.get("useflags") {
            if !flags.trim().is_empty() {
                return format!("USE flag run failed: [{flags}]");
            }
        }
        "default USE failed".to_string()
    }
}

/// A parsed `.report` file: a sequence of `---`-delimited records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub records: Vec<ReportRecord>,
}

impl Report {
    /// Parse the record-separated text format.
    ///
    /// Records are delimited by lines consisting solely of `---`; within a
    /// record, `key: value` lines populate the record's fields; blank lines
    /// and lines starting with `#` are ignored.
    pub fn parse(text: &str) -> Self {
        let mut records = Vec::new();
        let mut current = ReportRecord::default();
        let mut has_content = false;

        for line in text.lines() {
            let trimmed = line.trim_end();
            if trimmed.trim() == "---" {
                if has_content {
                    records.push(std::mem::take(&mut current));
                    has_content = false;
                }
                continue;
            }
            if trimmed.trim().is_empty() || trimmed.trim_start().starts_with('#') {
                continue;
            }
            if let Some((key, value)) = trimmed.split_once(':') {
                current
                    .fields
                    .insert(key.trim().to_string(), value.trim().to_string());
                has_content = true;
            }
        }
        if has_content {
            records.push(current);
        }

        Report { records }
    }

    /// Parse a report file on disk. A missing file yields an empty report.
    pub fn parse_file(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(_) => Report::default(),
        }
    }

    /// Human summary used as the Tester's job outcome string:
    /// `"fail (K fails / N runs):\n   <atom> <reason>\n..."`.
    pub fn failure_summary(&self) -> String {
        let failures: Vec<&ReportRecord> = self.records.iter().filter(|r| r.is_failure()).collect();
        let lines: Vec<String> = failures
            .iter()
            .map(|r| {
                let atom = r.atom().unwrap_or("<unknown>");
                format!("   {atom} {}", r.failure_summary())
            })
            .collect();
        format!(
            "fail ({} fails / {} runs):\n{}",
            failures.len(),
            self.records.len(),
            lines.join("\n")
        )
    }
}
