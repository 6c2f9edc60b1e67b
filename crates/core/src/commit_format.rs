//! Commit message formatting for sync commits.

use std::fmt::Write;

use chrono::{DateTime, Local};

use crate::config::SyncOptions;

/// Maximum number of paths listed by the `{files}` placeholder.
pub const MAX_LISTED_FILES: usize = 10;

/// Formats sync commit messages from the configured template.
///
/// Placeholders: `{date}` (local time in `date_format`) and `{files}` (a
/// newline-prefixed list of changed paths, empty when there are none).
pub struct CommitFormatter {
    template: String,
    date_format: String,
}

impl CommitFormatter {
    pub fn new(options: &SyncOptions) -> Self {
        Self {
            template: options.commit_template.clone(),
            date_format: options.date_format.clone(),
        }
    }

    /// Format a message for the current local time.
    pub fn format(&self, files: &[String]) -> String {
        self.format_at(Local::now(), files)
    }

    /// Format a message for a fixed timestamp.
    pub fn format_at(&self, when: DateTime<Local>, files: &[String]) -> String {
        self.template
            .replace("{date}", &self.render_date(when))
            .replace("{files}", &file_summary(files))
    }

    fn render_date(&self, when: DateTime<Local>) -> String {
        let mut out = String::new();
        if write!(out, "{}", when.format(&self.date_format)).is_err() {
            // Invalid user format string; fall back to RFC 3339.
            return when.to_rfc3339();
        }
        out
    }
}

/// Render the `{files}` block.
///
/// ```text
///
///   - a.md
///   - b.md
///   ... and 2 more file(s)
/// ```
pub fn file_summary(files: &[String]) -> String {
    if files.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n");
    let listed: Vec<String> = files
        .iter()
        .take(MAX_LISTED_FILES)
        .map(|f| format!("  - {f}"))
        .collect();
    out.push_str(&listed.join("\n"));
    if files.len() > MAX_LISTED_FILES {
        out.push_str(&format!(
            "\n  ... and {} more file(s)",
            files.len() - MAX_LISTED_FILES
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn formatter(template: &str) -> CommitFormatter {
        CommitFormatter::new(&SyncOptions {
            commit_template: template.into(),
            ..SyncOptions::default()
        })
    }

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap()
    }

    #[test]
    fn test_files_placeholder_lists_paths() {
        let files = vec!["a.md".to_string(), "b.md".to_string()];
        let msg = formatter("[Sync] {date}{files}").format_at(fixed_time(), &files);
        assert!(msg.starts_with("[Sync] 2024-03-09 14:05:00\n"));
        assert!(msg.lines().any(|l| l == "  - a.md"));
        assert!(msg.lines().any(|l| l == "  - b.md"));
        assert!(!msg.contains("{files}"));
        assert!(!msg.contains("{date}"));
    }

    #[test]
    fn test_truncates_after_ten_files() {
        let files: Vec<String> = (1..=12).map(|i| format!("note-{i}.md")).collect();
        let msg = formatter("{files}").format_at(fixed_time(), &files);
        let listed = msg.lines().filter(|l| l.starts_with("  - ")).count();
        assert_eq!(listed, 10);
        assert!(msg.ends_with("  ... and 2 more file(s)"));
        assert!(!msg.contains("note-11.md"));
    }

    #[test]
    fn test_no_files_renders_empty() {
        let msg = formatter("vault sync: {date}{files}").format_at(fixed_time(), &[]);
        assert_eq!(msg, "vault sync: 2024-03-09 14:05:00");
    }

    #[test]
    fn test_custom_date_format() {
        let f = CommitFormatter::new(&SyncOptions {
            commit_template: "{date}".into(),
            date_format: "%d/%m/%Y".into(),
            ..SyncOptions::default()
        });
        assert_eq!(f.format_at(fixed_time(), &[]), "09/03/2024");
    }

    #[test]
    fn test_template_without_placeholders() {
        let msg = formatter("manual backup").format(&["x.md".to_string()]);
        assert_eq!(msg, "manual backup");
    }
}
