//! End-to-end scenarios against a real server on an ephemeral port.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::Duration;
use wordcount_bench::client::parse_reply;
use wordcount_bench::config::Config;
use wordcount_bench::controller::ExperimentReport;
use wordcount_bench::runtime::Server;

fn start_server(cleaning: bool, workers: usize) -> (SocketAddr, Receiver<ExperimentReport>) {
    let mut server = Server::bind(&Config::new("127.0.0.1", 0, cleaning, workers)).unwrap();
    let addr = server.local_addr().unwrap();
    let reports = server.reports();
    thread::spawn(move || server.run());
    (addr, reports)
}

struct TestClient {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl TestClient {
    fn connect(addr: SocketAddr) -> Self {
        let writer = TcpStream::connect(addr).unwrap();
        writer.set_nodelay(true).unwrap();
        writer
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        let reader = BufReader::new(writer.try_clone().unwrap());
        Self { writer, reader }
    }

    fn read_reply(&mut self) -> HashMap<String, u64> {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        assert!(line.ends_with('\n'), "incomplete reply: {line:?}");
        parse_reply(&line).unwrap()
    }

    fn request(&mut self, document: &str) -> HashMap<String, u64> {
        self.writer.write_all(document.as_bytes()).unwrap();
        self.writer.write_all(b"$").unwrap();
        self.read_reply()
    }
}

fn counts(pairs: &[(&str, u64)]) -> HashMap<String, u64> {
    pairs.iter().map(|(w, c)| (w.to_string(), *c)).collect()
}

/// Reference counting: lowercase alphabetic runs split on whitespace.
fn expected_counts(document: &str) -> HashMap<String, u64> {
    let mut expected = HashMap::new();
    for token in document.split_whitespace() {
        let word: String = token
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if !word.is_empty() {
            *expected.entry(word).or_insert(0) += 1;
        }
    }
    expected
}

#[test]
fn test_punctuation_and_case_are_folded() {
    let (addr, _reports) = start_server(false, 1);
    let mut client = TestClient::connect(addr);

    let reply = client.request("The cat sat. The dog ran.");
    assert_eq!(
        reply,
        counts(&[("the", 2), ("cat", 1), ("sat", 1), ("dog", 1), ("ran", 1)])
    );
}

#[test]
fn test_cleaning_strips_markup() {
    let (addr, _reports) = start_server(true, 1);
    let mut client = TestClient::connect(addr);

    let reply = client.request("<html><body><h1>Hello</h1> hello <i>World</i></body></html>");
    assert_eq!(reply, counts(&[("hello", 2), ("world", 1)]));
}

#[test]
fn test_byte_at_a_time_delivery() {
    let (addr, _reports) = start_server(false, 1);
    let mut client = TestClient::connect(addr);

    let document = "Slow clients still get one reply per document";
    for byte in document.bytes().chain(std::iter::once(b'$')) {
        client.writer.write_all(&[byte]).unwrap();
        client.writer.flush().unwrap();
    }

    assert_eq!(client.read_reply(), expected_counts(document));
}

#[test]
fn test_two_clients_on_two_lanes() {
    let (addr, reports) = start_server(false, 2);

    let handles: Vec<_> = (0..2)
        .map(|id| {
            thread::spawn(move || {
                let mut client = TestClient::connect(addr);
                for n in 0..100 {
                    let document = format!(
                        "client{} Doc doc {} round{}",
                        letters(id),
                        "x ".repeat(n % 7),
                        letters(n)
                    );
                    let reply = client.request(&document);
                    assert_eq!(reply, expected_counts(&document), "request {n}");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let report = reports.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(report.clients, 2);
    assert_eq!(report.documents, 200);
    assert_eq!(report.count.samples.len(), 200);
    assert_eq!(report.serialize.samples.len(), 200);
}

#[test]
fn test_one_report_after_last_disconnect() {
    let (addr, reports) = start_server(false, 1);

    let mut first = TestClient::connect(addr);
    let mut second = TestClient::connect(addr);
    for _ in 0..3 {
        first.request("alpha beta");
        second.request("gamma");
    }

    drop(first);
    assert!(reports.recv_timeout(Duration::from_millis(300)).is_err());

    drop(second);
    let report = reports.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(report.clients, 2);
    assert_eq!(report.documents, 6);
    assert_eq!(report.receive.samples.len(), 6);
    assert_eq!(report.summary_line().split(';').count(), 8);
    assert!(reports.recv_timeout(Duration::from_millis(300)).is_err());

    // The next connection starts a fresh experiment.
    let mut third = TestClient::connect(addr);
    third.request("delta");
    drop(third);
    let report = reports.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(report.experiment, 2);
    assert_eq!(report.clients, 1);
    assert_eq!(report.documents, 1);
}

#[test]
fn test_pipelined_documents_close_the_connection() {
    let (addr, reports) = start_server(false, 1);
    let mut client = TestClient::connect(addr);

    client.writer.write_all(b"one$two$").unwrap();

    let mut line = String::new();
    let read = client.reader.read_line(&mut line);
    assert!(matches!(read, Ok(0) | Err(_)), "unexpected reply: {line:?}");

    let report = reports.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(report.documents, 0);
}

/// Spell a number with letters so it survives the alphabetic filter.
fn letters(mut n: usize) -> String {
    let mut out = String::new();
    loop {
        out.push((b'a' + (n % 26) as u8) as char);
        n /= 26;
        if n == 0 {
            return out;
        }
    }
}
