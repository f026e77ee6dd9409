//! Command dispatch for the interactive shell.
//!
//! Every line maps to one [`Outcome`]. Failures never abort the loop; they
//! become `ERR ...` replies.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::StreamConfig;
use crc32fast::Hasher as Crc32;
use mmstream::{MappedStream, MappedWriter, StreamError};
use tracing::info;

/// What the shell should do after a command.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Reply(String),
    Exit,
}

/// One mapped file plus, in read-write mode, its writer.
pub struct Repl {
    path: PathBuf,
    stream: MappedStream,
    writer: Option<MappedWriter>,
}

impl Repl {
    /// Opens `path` according to `config`. A read-write session creates the
    /// file if it does not exist yet.
    pub fn open(path: &Path, config: StreamConfig) -> Result<Self> {
        if config.map_mode.is_writable() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            let resize = file.try_clone()?;
            let stream = MappedStream::open(file, config)?;
            let writer = stream.writer(resize)?;
            Ok(Self {
                path: path.to_path_buf(),
                stream,
                writer: Some(writer),
            })
        } else {
            let file = File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            Ok(Self {
                path: path.to_path_buf(),
                stream: MappedStream::open(file, config)?,
                writer: None,
            })
        }
    }

    pub fn stream(&self) -> &MappedStream {
        &self.stream
    }

    /// Runs one input line. Blank lines yield `None`.
    pub fn handle(&self, line: &str) -> Option<Outcome> {
        let mut parts = line.split_whitespace();
        let cmd = parts.next()?;
        let args: Vec<&str> = parts.collect();

        let reply = match cmd.to_uppercase().as_str() {
            "EXIT" | "QUIT" => return Some(Outcome::Exit),
            "POS" => self.stream.position().map(|p| p.to_string()).map_err(Into::into),
            "LEN" => Ok(self.stream.length().to_string()),
            "REMAINING" => self.stream.remaining().map(|r| r.to_string()).map_err(Into::into),
            "SEEK" => self.seek(&args),
            "READ" => self.read(&args, false),
            "READSTR" => self.read(&args, true),
            "WRITE" => self.write(&args),
            "SKIP" => self.skip(&args),
            "MARK" => self.stream.mark().map(|()| "OK".to_string()).map_err(Into::into),
            "RESET" => self.stream.reset().map(|()| "OK".to_string()).map_err(Into::into),
            "SETLEN" => self.set_length(&args),
            "GROW" => self.grow(&args),
            "FLUSH" => self.flush(&args),
            "CRC" => self.crc(&args),
            "COPY" => self.copy(&args),
            "RECLAIM" => self
                .stream
                .reclaim_evicted()
                .map(|n| format!("reclaimed {n}"))
                .map_err(Into::into),
            "STATS" => Ok(format!("{:?}", self.stream.stats())),
            other => Ok(format!("unknown command: {other}")),
        };

        Some(Outcome::Reply(match reply {
            Ok(text) => text,
            Err(e) => format!("ERR {cmd} failed: {e:#}"),
        }))
    }

    /// Closes every handle, syncing a writable file.
    pub fn close(self) -> Result<()> {
        if let Some(writer) = &self.writer {
            writer.close()?;
        }
        self.stream.close()?;
        Ok(())
    }

    fn writer(&self) -> Result<&MappedWriter> {
        self.writer.as_ref().ok_or_else(|| StreamError::ReadOnly.into())
    }

    fn seek(&self, args: &[&str]) -> Result<String> {
        let pos: u64 = parse_arg(args.first(), "SEEK n")?;
        self.stream.set_position(pos)?;
        Ok("OK".to_string())
    }

    fn read(&self, args: &[&str], as_text: bool) -> Result<String> {
        let n: usize = parse_arg(args.first(), "READ n")?;
        let remaining = usize::try_from(self.stream.remaining()?).unwrap_or(usize::MAX);
        let mut buf = vec![0u8; n.min(remaining)];
        let Some(got) = self.stream.read_bytes(&mut buf)? else {
            return Ok("(eof)".to_string());
        };
        buf.truncate(got);
        if as_text {
            Ok(String::from_utf8_lossy(&buf).into_owned())
        } else {
            Ok(buf.iter().map(|b| format!("{b:02x}")).collect())
        }
    }

    fn write(&self, args: &[&str]) -> Result<String> {
        if args.is_empty() {
            anyhow::bail!("usage: WRITE text");
        }
        let writer = self.writer()?;
        writer.write_bytes(args.join(" ").as_bytes())?;
        Ok(format!("OK (len={})", writer.length()))
    }

    fn skip(&self, args: &[&str]) -> Result<String> {
        let n: i64 = parse_arg(args.first(), "SKIP n")?;
        Ok(format!("skipped {}", self.stream.skip(n)?))
    }

    fn set_length(&self, args: &[&str]) -> Result<String> {
        let n: u64 = parse_arg(args.first(), "SETLEN n")?;
        let writer = self.writer()?;
        writer.set_length(n)?;
        Ok(format!("OK (len={}, pos={})", writer.length(), writer.position()?))
    }

    fn grow(&self, args: &[&str]) -> Result<String> {
        let n: u64 = parse_arg(args.first(), "GROW n")?;
        let writer = self.writer()?;
        writer.grow(n)?;
        Ok(format!("OK (len={})", writer.length()))
    }

    fn flush(&self, args: &[&str]) -> Result<String> {
        let meta = matches!(args.first(), Some(a) if a.eq_ignore_ascii_case("meta"));
        self.stream.flush(meta)?;
        Ok("OK".to_string())
    }

    /// CRC32 of the next `n` bytes (or the rest), hashed straight from the
    /// mapping. The position is restored afterwards.
    fn crc(&self, args: &[&str]) -> Result<String> {
        let start = self.stream.position()?;
        let remaining = self.stream.remaining()?;
        let covered = match args.first() {
            Some(_) => parse_arg::<u64>(args.first(), "CRC [n]")?.min(remaining),
            None => remaining,
        };

        let mut hasher = Crc32::new();
        let walked = self.hash_forward(&mut hasher, covered);
        self.stream.set_position(start)?;
        walked?;

        Ok(format!("{:08x} ({covered} bytes)", hasher.finalize()))
    }

    fn hash_forward(&self, hasher: &mut Crc32, mut left: u64) -> Result<()> {
        while left > 0 {
            let taken = self.stream.with_current_slice(|bytes| {
                let take = bytes.len().min(usize::try_from(left).unwrap_or(usize::MAX));
                hasher.update(&bytes[..take]);
                take
            })?;
            if taken == 0 {
                break;
            }
            self.stream.skip(taken as i64)?;
            left -= taken as u64;
        }
        Ok(())
    }

    /// Splices the remaining bytes into a new file at `path`.
    fn copy(&self, args: &[&str]) -> Result<String> {
        let path = args.first().context("usage: COPY path")?;
        if same_file(&self.path, Path::new(path)) {
            anyhow::bail!("{path} is the mapped file");
        }
        let target = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("failed to create {path}"))?;
        let config = StreamConfig::read_write().with_slice_shift(self.stream.slice_shift());
        let dst = MappedWriter::open_file(target, config)?;

        let count = self.stream.remaining()?;
        dst.write_from_stream(&self.stream, count)?;
        dst.close()?;
        info!(count, path = %path, "copied stream tail");
        Ok(format!("copied {count} bytes to {path}"))
    }
}

/// Whether `path` names the same file as `mapped`. A path that does not
/// exist yet cannot be it.
fn same_file(mapped: &Path, path: &Path) -> bool {
    match (mapped.canonicalize(), path.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn parse_arg<T: std::str::FromStr>(arg: Option<&&str>, usage: &str) -> Result<T> {
    arg.and_then(|a| a.parse().ok())
        .with_context(|| format!("usage: {usage}"))
}
