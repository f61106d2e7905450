//! wordcount-client: sends synthetic documents to a wordcount server and
//! reports response-time statistics.

use clap::Parser;
use rand::Rng;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use wordcount_bench::client::{load_reference, synthesize, WordCountClient};

/// Command-line arguments for the load-generating client
#[derive(Parser, Debug)]
#[command(name = "wordcount-client")]
#[command(author = "wordcount-bench authors")]
#[command(version = "0.1.0")]
#[command(about = "Load generator for the wordcount server", long_about = None)]
#[command(
    override_usage = "wordcount-client <servername> <serverport> <documentsize(KiB)> <opcount(x1000)> [<seed>] [<number of clients>]"
)]
struct ClientArgs {
    /// Server hostname or IP address
    server_name: String,

    /// Server port
    server_port: u16,

    /// Document size in KiB (fractions allowed)
    document_size_kib: f64,

    /// Number of documents to send, in thousands
    op_count_thousands: u64,

    /// Offset into the reference text; -1 or omitted picks one at random
    #[arg(allow_negative_numbers = true)]
    seed: Option<i64>,

    /// Number of clients in the experiment (only echoed in the summary line)
    #[arg(allow_negative_numbers = true)]
    clients: Option<i64>,

    /// Reference text the documents are cut from
    #[arg(long, default_value = "input.html")]
    input: PathBuf,

    /// Document separator character
    #[arg(long, default_value_t = '$')]
    separator: char,

    /// Delay before closing the connection after the last reply
    #[arg(long, default_value_t = 2000)]
    cooldown_ms: u64,

    /// Skip parsing replies; only measure latency
    #[arg(long)]
    no_verify: bool,

    /// Also print the `docKiB;clients;totalSecs;avg;std;tput` line
    #[arg(long)]
    summary: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = match ClientArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            process::exit(0);
        }
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if !args.separator.is_ascii() {
        return Err(format!("separator must be ASCII, got {:?}", args.separator).into());
    }

    let seed = match args.seed {
        Some(seed) if seed >= 0 => seed as u64,
        _ => rand::thread_rng().gen_range(0..10_000),
    };
    let doc_len = (args.document_size_kib * 1024.0) as usize;
    let ops = args.op_count_thousands * 1000;

    // One document for the whole run keeps generation out of the measurement.
    let reference = load_reference(&args.input)?;
    let document = synthesize(&reference, doc_len, seed, args.separator)?;

    let mut client =
        WordCountClient::connect(&args.server_name, args.server_port, args.separator as u8).await?;

    info!(
        server = %args.server_name,
        port = args.server_port,
        doc_len,
        ops,
        seed,
        "Starting client"
    );

    for rep in 0..ops {
        if args.no_verify {
            client.send(&document).await?;
        } else {
            let counts = client.word_count(&document).await?;
            debug!(words = counts.len(), "Reply parsed");
        }

        if rep % 25 == 0 {
            if let Some(line) = client.stats_mut().interval(false) {
                println!("{line}");
            }
        }
    }

    if let Some(line) = client.stats_mut().interval(true) {
        println!("{line}");
    }
    println!("-----");
    println!("{}", client.stats().totals());
    print!("{}", client.stats().percentile_dump());
    if args.summary {
        println!(
            "{}",
            client
                .stats()
                .summary_line(args.document_size_kib, args.clients.unwrap_or(-1))
        );
    }

    tokio::time::sleep(Duration::from_millis(args.cooldown_ms)).await;
    client.shutdown().await?;

    Ok(())
}
