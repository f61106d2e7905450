//! Synthetic document generation.
//!
//! Documents are slices of a reference text. The seed picks the starting
//! offset so different clients send different (but reproducible) text.

use std::path::Path;

/// Errors building a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    /// The reference text has no characters to sample from.
    EmptyReference,
}

impl std::fmt::Display for DocumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentError::EmptyReference => write!(f, "reference text is empty"),
        }
    }
}

impl std::error::Error for DocumentError {}

/// Read the reference file, trimming every line and joining them with
/// single spaces (each line is followed by one).
pub fn load_reference(path: &Path) -> std::io::Result<String> {
    let contents = std::fs::read_to_string(path)?;
    Ok(join_lines(&contents))
}

fn join_lines(contents: &str) -> String {
    let mut joined = String::with_capacity(contents.len());
    for line in contents.lines() {
        joined.push_str(line.trim());
        joined.push(' ');
    }
    joined
}

/// Take `length` characters of `reference` starting at offset `seed`,
/// wrapping around, with every `separator` replaced by `.`.
pub fn synthesize(
    reference: &str,
    length: usize,
    seed: u64,
    separator: char,
) -> Result<String, DocumentError> {
    let chars: Vec<char> = reference.chars().collect();
    if chars.is_empty() {
        return Err(DocumentError::EmptyReference);
    }

    let start = (seed % chars.len() as u64) as usize;
    Ok(chars
        .iter()
        .cycle()
        .skip(start)
        .take(length)
        .map(|&c| if c == separator { '.' } else { c })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_lines() {
        assert_eq!(join_lines("  <p>one</p>\n\ttwo  \n"), "<p>one</p> two ");
    }

    #[test]
    fn test_synthesize_wraps_from_seed() {
        let doc = synthesize("abcd", 6, 2, '$').unwrap();
        assert_eq!(doc, "cdabcd");
    }

    #[test]
    fn test_synthesize_is_deterministic() {
        let reference = "The quick brown fox jumps over the lazy dog. ";
        let a = synthesize(reference, 1024, 77, '$').unwrap();
        let b = synthesize(reference, 1024, 77, '$').unwrap();
        assert_eq!(a, b);
        assert_eq!(a.chars().count(), 1024);
    }

    #[test]
    fn test_synthesize_strips_separator() {
        let doc = synthesize("cost: $5 ", 9, 0, '$').unwrap();
        assert_eq!(doc, "cost: .5 ");
        assert!(!doc.contains('$'));
    }

    #[test]
    fn test_empty_reference() {
        assert_eq!(synthesize("", 10, 0, '$'), Err(DocumentError::EmptyReference));
    }
}
