//! # CLI - mmstream Interactive Shell
//!
//! A REPL over one memory-mapped file. Reads commands from stdin, runs them
//! against a mapped stream, and prints results to stdout. Works both
//! interactively and scripted (pipe commands via stdin).
//!
//! ## Commands
//!
//! ```text
//! POS                Print the current position
//! SEEK n             Move to absolute position n
//! LEN / REMAINING    Print the length / bytes left after the cursor
//! READ n             Read up to n bytes, printed as hex
//! READSTR n          Read up to n bytes, printed as text
//! WRITE text         Write text at the cursor (grows the file as needed)
//! SKIP n             Advance by up to n bytes
//! MARK / RESET       Remember / return to the current position
//! SETLEN n           Resize the file to n bytes
//! GROW n             Extend the file by n bytes
//! FLUSH [meta]       Sync dirty slices (and metadata) to disk
//! CRC [n]            CRC32 of the next n bytes (default: the rest)
//! COPY path          Copy the remaining bytes into a new file
//! RECLAIM            Drop soft-evicted slice mappings
//! STATS              Print stream diagnostics
//! EXIT / QUIT        Close the stream and leave
//! ```
//!
//! ## Configuration
//!
//! ```text
//! MMSTREAM_PATH          File to map                   (default: "data.bin")
//! MMSTREAM_MAP_MODE      ro | rw                       (default: ro)
//! MMSTREAM_CACHE_MODE    none | soft | hard            (default: soft)
//! MMSTREAM_SLICE_SHIFT   slice size exponent, 1..=30   (default: 30 on 64-bit)
//! MMSTREAM_SYNC          sync every write              (default: false)
//! MMSTREAM_HARD_UNMAP    allow eager unmapping         (default: true)
//! MMSTREAM_SOFT_CAPACITY pooled evicted slices         (default: 4)
//! RUST_LOG               log filter                    (default: warn)
//! ```
//!
//! ## Example
//!
//! ```text
//! $ MMSTREAM_MAP_MODE=rw MMSTREAM_SLICE_SHIFT=12 cargo run -p cli
//! mmstream started (path=data.bin, len=0, map=rw, cache=soft, slice_shift=12)
//! > WRITE hello world
//! OK (len=11)
//! > SEEK 0
//! OK
//! > READSTR 5
//! hello
//! > EXIT
//! bye
//! ```

mod repl;

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use config::StreamConfig;
use repl::{Outcome, Repl};
use tracing_subscriber::EnvFilter;

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let path = env_or("MMSTREAM_PATH", "data.bin");
    let config = StreamConfig::from_env().context("invalid MMSTREAM_* configuration")?;
    let repl = Repl::open(Path::new(&path), config)?;

    let stream = repl.stream();
    println!(
        "mmstream started (path={}, len={}, map={}, cache={}, slice_shift={})",
        path,
        stream.length(),
        stream.map_mode(),
        stream.cache_mode(),
        stream.slice_shift()
    );
    println!("Commands: POS | SEEK n | LEN | REMAINING | READ n | READSTR n | WRITE text");
    println!("          SKIP n | MARK | RESET | SETLEN n | GROW n | FLUSH [meta]");
    println!("          CRC [n] | COPY path | RECLAIM | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = line?;
        match repl.handle(&line) {
            Some(Outcome::Exit) => {
                println!("bye");
                break;
            }
            Some(Outcome::Reply(text)) => println!("{text}"),
            None => {}
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    repl.close()
}
