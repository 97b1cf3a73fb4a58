//! Shared styling utilities for the CLI.

use console::Style;

use papersync_core::conflict::Verdict;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold).
pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Short revision id, cyan.
pub fn revision(sha: &str) -> String {
    let short = sha.char_indices().nth(7).map_or(sha, |(i, _)| &sha[..i]);
    Style::new().cyan().apply_to(short).to_string()
}

/// One line describing a conflict verdict.
pub fn verdict(verdict: &Verdict) -> String {
    let text = verdict.to_string();
    if verdict.is_ok() {
        success(&text)
    } else {
        match verdict {
            Verdict::Unverifiable { .. } => warn(&text),
            _ => error(&text),
        }
    }
}

/// Colour a unified diff line by line.
pub fn patch(text: &str) -> String {
    let added = Style::new().green();
    let removed = Style::new().red();
    let hunk = Style::new().cyan();
    text.lines()
        .map(|line| {
            if line.starts_with("+++") || line.starts_with("---") {
                header(line)
            } else if line.starts_with('+') {
                added.apply_to(line).to_string()
            } else if line.starts_with('-') {
                removed.apply_to(line).to_string()
            } else if line.starts_with("@@") {
                hunk.apply_to(line).to_string()
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_truncates_on_char_boundary() {
        console::set_colors_enabled(false);
        assert_eq!(revision("0123456789abcdef"), "0123456");
        assert_eq!(revision("abc"), "abc");
        assert_eq!(revision("ééééééééé"), "ééééééé");
    }
}
