//! Document processing pipeline.
//!
//! Three timed stages run on each extracted document:
//! - `clean`: optional tag and punctuation stripping
//! - `count`: token counting into the client's [`WordCountTable`]
//! - `serialize`: rendering the reply, which consumes the table
//!
//! Stage durations are appended to the client's [`Session`] in milliseconds.

mod clean;
mod count;

pub use clean::{clean_document, filter_words};
pub use count::WordCountTable;

use std::time::Instant;

/// Per-stage latency samples (milliseconds) for one client.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StageLatencies {
    pub clean: Vec<f64>,
    pub count: Vec<f64>,
    pub serialize: Vec<f64>,
}

/// Processing state of one client, owned by whichever thread runs its
/// current document.
#[derive(Debug, Default)]
pub struct Session {
    /// Counts for the in-flight document. `None` once serialized.
    table: Option<WordCountTable>,
    latencies: StageLatencies,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latencies(&self) -> &StageLatencies {
        &self.latencies
    }

    /// Count the words of `line` into this client's table, creating the
    /// table if the previous reply consumed it.
    pub fn count(&mut self, line: &str) {
        self.table.get_or_insert_with(WordCountTable::new).count_line(line);
    }

    /// Render the reply for the current table and remove the table.
    ///
    /// A second call without an intervening [`Session::count`] finds no
    /// table and returns an empty string, recording no sample.
    pub fn serialize(&mut self) -> String {
        let Some(table) = self.table.take() else {
            return String::new();
        };
        let start = Instant::now();
        let reply = table.into_reply();
        self.latencies.serialize.push(elapsed_ms(start));
        reply
    }
}

/// Runs the stages for one document.
#[derive(Debug, Clone, Copy)]
pub struct Pipeline {
    cleaning: bool,
}

impl Pipeline {
    pub fn new(cleaning: bool) -> Self {
        Self { cleaning }
    }

    /// Clean and count `document` into the session's table, timing both.
    ///
    /// With cleaning disabled the clean stage is a no-op that still records
    /// its (near-zero) duration, and counting applies the inline filter.
    pub fn count(&self, document: &[u8], session: &mut Session) {
        let start = Instant::now();
        let cleaned = self.cleaning.then(|| clean_document(document));
        session.latencies.clean.push(elapsed_ms(start));

        let start = Instant::now();
        match cleaned {
            Some(text) => session.count(&text),
            None => session.count(&filter_words(document)),
        }
        session.latencies.count.push(elapsed_ms(start));
    }

    /// Run all three stages and return the serialized reply.
    pub fn process(&self, document: &[u8], session: &mut Session) -> String {
        self.count(document, session);
        session.serialize()
    }
}

/// Milliseconds since `start` as a float.
pub(crate) fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn reply_map(reply: &str) -> HashMap<String, u64> {
        let body = reply.trim_end_matches('\n');
        let parts: Vec<&str> = body.split(',').filter(|p| !p.is_empty()).collect();
        parts
            .chunks(2)
            .map(|pair| (pair[0].to_string(), pair[1].parse().unwrap()))
            .collect()
    }

    #[test]
    fn test_process_without_cleaning() {
        let pipeline = Pipeline::new(false);
        let mut session = Session::new();

        let reply = pipeline.process(b"The cat sat. The dog ran.", &mut session);
        let counts = reply_map(&reply);

        let expected: HashMap<String, u64> =
            [("the", 2), ("cat", 1), ("sat", 1), ("dog", 1), ("ran", 1)]
                .into_iter()
                .map(|(w, c)| (w.to_string(), c))
                .collect();
        assert_eq!(counts, expected);
    }

    #[test]
    fn test_process_with_cleaning() {
        let pipeline = Pipeline::new(true);
        let mut session = Session::new();

        let reply = pipeline.process(b"<h1>Title</h1> <p>Body body</p>", &mut session);
        let counts = reply_map(&reply);
        assert_eq!(counts.len(), 2);
        assert_eq!(counts["title"], 1);
        assert_eq!(counts["body"], 2);
    }

    #[test]
    fn test_adjacent_tags_join_words() {
        let pipeline = Pipeline::new(true);
        let mut session = Session::new();

        let reply = pipeline.process(b"<h1>Title</h1><p>Body body</p>", &mut session);
        let counts = reply_map(&reply);
        assert_eq!(counts.len(), 2);
        assert_eq!(counts["titlebody"], 1);
        assert_eq!(counts["body"], 1);
    }

    #[test]
    fn test_every_stage_records_a_sample() {
        let pipeline = Pipeline::new(true);
        let mut session = Session::new();

        pipeline.process(b"one", &mut session);
        pipeline.process(b"two", &mut session);

        let latencies = session.latencies();
        assert_eq!(latencies.clean.len(), 2);
        assert_eq!(latencies.count.len(), 2);
        assert_eq!(latencies.serialize.len(), 2);
        assert!(latencies.count.iter().all(|ms| *ms >= 0.0));
    }

    #[test]
    fn test_serialize_consumes_table() {
        let pipeline = Pipeline::new(false);
        let mut session = Session::new();

        pipeline.count(b"hello hello", &mut session);
        assert_eq!(session.serialize(), "hello,2,\n");
        assert_eq!(session.serialize(), "");
        assert_eq!(session.latencies().serialize.len(), 1);
    }

    #[test]
    fn test_documents_do_not_leak_between_replies() {
        let pipeline = Pipeline::new(false);
        let mut session = Session::new();

        pipeline.process(b"first", &mut session);
        let reply = pipeline.process(b"second", &mut session);
        assert_eq!(reply, "second,1,\n");
    }

    #[test]
    fn test_empty_document_reply() {
        let pipeline = Pipeline::new(false);
        let mut session = Session::new();
        assert_eq!(pipeline.process(b"...", &mut session), "\n");
    }
}
