//! Character filters applied to documents before counting.
//!
//! Both filters keep only `[a-z]` (after ASCII case folding) and single
//! separating spaces. Bytes outside ASCII never match and are dropped.

/// Fold a byte into the filter alphabet: `Some(b'a'..=b'z')`, `Some(b' ')`
/// for any ASCII whitespace, `None` for everything else.
#[inline]
fn fold(byte: u8) -> Option<u8> {
    let lower = byte.to_ascii_lowercase();
    if lower.is_ascii_lowercase() {
        Some(lower)
    } else if byte.is_ascii_whitespace() {
        Some(b' ')
    } else {
        None
    }
}

/// Lightweight filter used when cleaning is disabled: no tag awareness.
///
/// Leading whitespace is dropped and runs of whitespace collapse to one space.
pub fn filter_words(document: &[u8]) -> String {
    let mut out = String::with_capacity(document.len());
    let mut last = b' ';

    for &byte in document {
        match fold(byte) {
            Some(b' ') if last == b' ' => {}
            Some(c) => {
                out.push(c as char);
                last = c;
            }
            None => {}
        }
    }

    out
}

/// Strip angle-bracket tags and non-alphabetic characters.
///
/// Tags are tracked with a depth counter: every `<` opens a level and every
/// `>` closes one if any is open. Text is kept only at depth zero. Text seen
/// before the first tag boundary is held back and emitted once that boundary
/// (or the end of the document) is reached. The result is trimmed.
pub fn clean_document(document: &[u8]) -> String {
    let mut out = String::with_capacity(document.len());
    let mut prefix = String::new();
    let mut in_prefix = true;
    let mut depth = 0usize;
    let mut last = b' ';

    for &byte in document {
        match byte {
            b'<' => {
                if in_prefix {
                    out.push_str(&prefix);
                    in_prefix = false;
                }
                depth += 1;
            }
            b'>' => {
                if in_prefix {
                    out.push_str(&prefix);
                    in_prefix = false;
                }
                depth = depth.saturating_sub(1);
            }
            _ => {
                let c = match fold(byte) {
                    Some(b' ') if last == b' ' => continue,
                    Some(c) => c,
                    None => continue,
                };
                if in_prefix {
                    prefix.push(c as char);
                    last = c;
                } else if depth == 0 {
                    out.push(c as char);
                    last = c;
                }
            }
        }
    }

    if in_prefix {
        out.push_str(&prefix);
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_words_punctuation_and_case() {
        assert_eq!(filter_words(b"The cat sat. The dog ran."), "the cat sat the dog ran");
    }

    #[test]
    fn test_filter_words_collapses_whitespace() {
        assert_eq!(filter_words(b"  alpha-beta \t\n gamma  "), "alphabeta gamma ");
    }

    #[test]
    fn test_filter_words_drops_non_ascii() {
        assert_eq!(filter_words("caf\u{e9} na\u{ef}ve".as_bytes()), "caf nave");
    }

    #[test]
    fn test_clean_strips_tags() {
        let doc = b"<html><body>Hello <b>World</b></body></html>";
        assert_eq!(clean_document(doc), "hello world");
    }

    #[test]
    fn test_clean_discards_tag_content() {
        let doc = b"<p class=\"intro\">some text</p><a href=x>link</a>";
        assert_eq!(clean_document(doc), "some textlink");
    }

    #[test]
    fn test_clean_flushes_prefix_at_first_tag() {
        let doc = b"Leading words <i>then</i> more";
        assert_eq!(clean_document(doc), "leading words then more");
    }

    #[test]
    fn test_clean_flushes_prefix_at_end() {
        assert_eq!(clean_document(b"No Tags At All!"), "no tags at all");
    }

    #[test]
    fn test_clean_nested_tags() {
        // `<a <b> c>` nests: depth returns to zero only after the second `>`.
        let doc = b"x <a <b> hidden> shown";
        assert_eq!(clean_document(doc), "x shown");
    }

    #[test]
    fn test_clean_unbalanced_close() {
        let doc = b"<p>one</p>> two";
        assert_eq!(clean_document(doc), "one two");
    }
}
