//! Word counting and reply serialization.

use std::collections::HashMap;

/// Running word counts for the document currently being processed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WordCountTable {
    counts: HashMap<String, u64>,
}

impl WordCountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count every space-separated token of an already filtered line.
    /// Empty tokens are skipped.
    pub fn count_line(&mut self, line: &str) {
        for word in line.split(' ').filter(|w| !w.is_empty()) {
            match self.counts.get_mut(word) {
                Some(count) => *count += 1,
                None => {
                    self.counts.insert(word.to_string(), 1);
                }
            }
        }
    }

    pub fn get(&self, word: &str) -> Option<u64> {
        self.counts.get(word).copied()
    }

    /// Render as `word,count,word,count,...,\n` in map iteration order.
    ///
    /// Takes the table by value: a reply can be rendered once.
    pub fn into_reply(self) -> String {
        let mut reply = String::with_capacity(self.counts.len() * 12 + 1);
        for (word, count) in self.counts {
            reply.push_str(&word);
            reply.push(',');
            reply.push_str(&count.to_string());
            reply.push(',');
        }
        reply.push('\n');
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(reply: &str) -> HashMap<String, u64> {
        let body = reply.strip_suffix('\n').unwrap();
        let parts: Vec<&str> = body.split(',').filter(|p| !p.is_empty()).collect();
        parts
            .chunks(2)
            .map(|pair| (pair[0].to_string(), pair[1].parse().unwrap()))
            .collect()
    }

    #[test]
    fn test_count_line() {
        let mut table = WordCountTable::new();
        table.count_line("the cat sat the dog ran ");
        assert_eq!(table.get("the"), Some(2));
        assert_eq!(table.get("ran"), Some(1));
        assert_eq!(table.get("cat"), Some(1));
        assert_eq!(table.get(""), None);
    }

    #[test]
    fn test_counts_accumulate_across_lines() {
        let mut table = WordCountTable::new();
        table.count_line("a b");
        table.count_line("a");
        assert_eq!(table.get("a"), Some(2));
        assert_eq!(table.get("b"), Some(1));
    }

    #[test]
    fn test_reply_format() {
        let mut table = WordCountTable::new();
        table.count_line("word word");
        assert_eq!(table.into_reply(), "word,2,\n");
    }

    #[test]
    fn test_reply_contents() {
        let mut table = WordCountTable::new();
        table.count_line("x y z x");
        let reply = table.into_reply();
        assert!(reply.ends_with(",\n"));
        let parsed = parse(&reply);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed["x"], 2);
        assert_eq!(parsed["y"], 1);
        assert_eq!(parsed["z"], 1);
    }

    #[test]
    fn test_empty_table_reply() {
        assert_eq!(WordCountTable::new().into_reply(), "\n");
    }
}
