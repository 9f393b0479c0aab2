//! Frequency program loader.
//!
//! Receivers are programmed with `frq*.cfg` files whose channel lines look like
//! `[0001]=0045.000,0`. Only numeric keys count; the first comma field of the value
//! is the centre frequency in MHz. Channels are ordered by key.

use crate::core::FrequencyTable;
use crate::error::AppResult;
use std::path::Path;
use tracing::{debug, info};

/// Removes a trailing `//` or `#` comment.
pub(crate) fn strip_inline_comment(text: &str) -> &str {
    let mut end = text.len();
    for sep in ["//", "#"] {
        if let Some(pos) = text.find(sep) {
            end = end.min(pos);
        }
    }
    text[..end].trim()
}

fn parse_freq_value(text: &str) -> Option<f64> {
    let text = strip_inline_comment(text);
    text.split(',')
        .map(str::trim)
        .find(|part| !part.is_empty())?
        .parse()
        .ok()
}

/// Parses the lines of a frequency program.
pub fn parse_frequencies(text: &str) -> FrequencyTable {
    let mut items: Vec<(u32, f64)> = Vec::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("//") || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = split_pair(line) else {
            continue;
        };
        // meta keys such as [target] or [number_of_measurements]
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let (Ok(index), Some(freq_mhz)) = (key.parse::<u32>(), parse_freq_value(value)) else {
            continue;
        };
        items.push((index, freq_mhz));
    }
    items.sort_by_key(|(index, _)| *index);
    FrequencyTable::new(items.into_iter().map(|(_, f)| f).collect())
}

/// `[key]=value` with optional whitespace around `=`.
fn split_pair(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('[')?;
    let (key, rest) = rest.split_once(']')?;
    let value = rest.trim_start().strip_prefix('=')?;
    Some((key.trim(), value))
}

/// Loads a frequency program. A missing file yields an empty table and the writer
/// falls back to channel indices.
pub fn load_frequencies(path: &Path) -> AppResult<FrequencyTable> {
    if !path.is_file() {
        info!(path = %path.display(), "Frequency file not found, using channel indices");
        return Ok(FrequencyTable::default());
    }
    let text = std::fs::read_to_string(path)?;
    let table = parse_frequencies(&text);
    debug!(path = %path.display(), channels = table.len(), "Loaded frequency program");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: &str = "\
// frq00005.cfg
[target]=BLEN7M
[number_of_measurements]=3
[0002]=0045.250,0
[0001]=0045.000,0   // first channel
[0003] = 0045.500 , 1
[0004]=garbage,0
";

    #[test]
    fn parses_numeric_keys_in_order() {
        let table = parse_frequencies(PROGRAM);
        assert_eq!(table.as_slice(), &[45.0, 45.25, 45.5]);
    }

    #[test]
    fn strips_comments() {
        assert_eq!(strip_inline_comment("04:00:00,03,3 // start"), "04:00:00,03,3");
        assert_eq!(strip_inline_comment("a # b // c"), "a");
        assert_eq!(strip_inline_comment("plain"), "plain");
    }

    #[test]
    fn missing_file_is_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = load_frequencies(&dir.path().join("absent.cfg")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frq.cfg");
        std::fs::write(&path, PROGRAM).unwrap();
        assert_eq!(load_frequencies(&path).unwrap().len(), 3);
    }
}
