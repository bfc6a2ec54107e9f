pub mod detector;
pub mod payloads;

use std::fs;
use std::io;

/// Non-empty trimmed lines of a target or payload list. Lines starting with
/// `#` are comments.
pub fn read_lines(path: &str) -> io::Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
