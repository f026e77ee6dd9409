//! # mmstream - Sliced Memory-Mapped Streams
//!
//! Reads and writes a file of any size through a window of fixed-size
//! memory mappings ("slices") that follows the cursor.
//!
//! ## Layout
//!
//! ```text
//!   file   [ slice 0 ][ slice 1 ][ slice 2 ][ ... ][ slice n-1 ]
//!                          ^
//!                       cursor            (last slice may be short)
//!
//!   MappedStream ──┐
//!                  ├── Arc<Mutex<StreamState>> ── SliceTable ── Region (mmap)
//!   MappedWriter ──┘                          └─ SliceLifecycle
//! ```
//!
//! A slice is mapped the first time the cursor touches it. When the cursor
//! leaves a slice the [`CacheMode`] decides its fate:
//!
//! | Mode        | On leaving a slice                                     |
//! |-------------|--------------------------------------------------------|
//! | `NoFlush`   | keep it mapped until close                             |
//! | `SoftFlush` | park it in a bounded pool; reuse it if still there     |
//! | `HardFlush` | unmap it at once (falls back to `SoftFlush` if it can't) |
//!
//! ## Module Responsibilities
//!
//! | Module          | Purpose                                            |
//! |-----------------|----------------------------------------------------|
//! | [`stream`]      | `MappedStream`: the reader handle, `Read` + `Seek` |
//! | [`writer`]      | `MappedWriter`: growth, copies, `Write` + `Seek`   |
//! | `state`         | shared cursor, mark, length changes, teardown      |
//! | `slice_table`   | slot bookkeeping and the resurrection pool         |
//! | `lifecycle`     | eviction policy per cache mode                     |
//! | `region`        | a single `memmap2` mapping                         |
//! | [`resize`]      | the pluggable file resize op                       |
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::fs::OpenOptions;
//! use mmstream::{MappedWriter, StreamConfig};
//!
//! # fn main() -> mmstream::Result<()> {
//! let file = OpenOptions::new()
//!     .read(true)
//!     .write(true)
//!     .create(true)
//!     .open("data.bin")?;
//! let writer = MappedWriter::open_file(file, StreamConfig::read_write())?;
//! writer.write_bytes(b"hello")?;
//!
//! let reader = writer.reader()?;
//! reader.set_position(0)?;
//! let mut buf = [0u8; 5];
//! reader.read_bytes(&mut buf)?;
//! assert_eq!(&buf, b"hello");
//! # Ok(())
//! # }
//! ```

mod error;
mod lifecycle;
mod region;
pub mod resize;
mod slice_table;
mod state;
pub mod stream;
pub mod writer;

pub use config::{CacheMode, MapMode, StreamConfig, DEFAULT_SLICE_SHIFT};
pub use error::{Result, StreamError};
pub use region::platform_has_hard_unmap;
pub use resize::{FileResize, ResizeFn};
pub use state::StreamStats;
pub use stream::MappedStream;
pub use writer::MappedWriter;

#[cfg(test)]
mod tests;
