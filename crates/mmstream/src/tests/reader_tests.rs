use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use anyhow::Result;
use tempfile::tempdir;

use super::helpers::*;
use crate::*;

// --------------------- Construction ---------------------

#[test]
fn open_reports_geometry() -> Result<()> {
    let dir = tempdir()?;
    let stream = reader_over(dir.path(), &patterned(2600), CacheMode::SoftFlush)?;

    assert_eq!(stream.length(), 2600);
    assert_eq!(stream.position()?, 0);
    assert_eq!(stream.remaining()?, 2600);
    assert_eq!(stream.slice_shift(), SHIFT);
    assert_eq!(stream.slice_size(), SLICE);
    assert_eq!(stream.slice_count(), 3);
    assert_eq!(stream.map_mode(), MapMode::ReadOnly);
    assert_eq!(stream.stats().maps, 0, "slices are mapped lazily");
    Ok(())
}

#[test]
fn read_only_over_empty_file_fails() -> Result<()> {
    let dir = tempdir()?;
    let path = file_with(dir.path(), "empty.bin", &[])?;
    let err = MappedStream::open_read_only(File::open(path)?).unwrap_err();
    assert!(matches!(err, StreamError::Map { .. }), "got {err:?}");
    Ok(())
}

#[test]
fn invalid_slice_shift_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let path = file_with(dir.path(), "a.bin", b"abc")?;
    let config = StreamConfig::read_only().with_slice_shift(0);
    let err = MappedStream::open(File::open(path)?, config).unwrap_err();
    assert!(matches!(err, StreamError::Config(_)));
    Ok(())
}

#[test]
fn read_write_stream_may_start_empty() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("empty.bin");
    let stream = MappedStream::open(open_rw(&path)?, rw_config(CacheMode::SoftFlush))?;

    assert_eq!(stream.length(), 0);
    assert_eq!(stream.slice_count(), 0);
    assert_eq!(stream.current_slice_index()?, 0);
    assert_eq!(stream.read_byte()?, None);
    Ok(())
}

// --------------------- Positioning ---------------------

#[test]
fn set_position_accepts_length_and_rejects_beyond() -> Result<()> {
    let dir = tempdir()?;
    let stream = reader_over(dir.path(), &patterned(2600), CacheMode::SoftFlush)?;

    stream.set_position(2600)?;
    assert_eq!(stream.remaining()?, 0);
    assert_eq!(stream.read_byte()?, None);

    let err = stream.set_position(2601).unwrap_err();
    assert!(matches!(
        err,
        StreamError::Range {
            value: 2601,
            limit: 2600,
            ..
        }
    ));
    assert_eq!(stream.position()?, 2600, "failed seek leaves cursor alone");
    Ok(())
}

#[test]
fn slice_index_follows_cursor_across_boundaries() -> Result<()> {
    let dir = tempdir()?;
    let stream = reader_over(dir.path(), &patterned(2600), CacheMode::SoftFlush)?;

    for (pos, index) in [(0, 0), (1023, 0), (1024, 1), (2047, 1), (2048, 2), (2599, 2), (2600, 2)] {
        stream.set_position(pos)?;
        assert_eq!(stream.current_slice_index()?, index, "at position {pos}");
    }
    Ok(())
}

#[test]
fn byte_reads_cross_every_boundary() -> Result<()> {
    let dir = tempdir()?;
    let content = patterned(2600);
    let stream = reader_over(dir.path(), &content, CacheMode::SoftFlush)?;

    let mut seen = Vec::with_capacity(content.len());
    while let Some(b) = stream.read_byte()? {
        seen.push(b);
    }
    assert_eq!(seen, content);
    assert_eq!(stream.position()?, 2600);
    assert_eq!(stream.current_slice_index()?, 2);
    Ok(())
}

#[test]
fn bulk_read_spans_slices() -> Result<()> {
    let dir = tempdir()?;
    let content = patterned(2600);
    let stream = reader_over(dir.path(), &content, CacheMode::SoftFlush)?;

    stream.set_position(1000)?;
    let mut buf = vec![0u8; 1100];
    assert_eq!(stream.read_bytes(&mut buf)?, Some(1100));
    assert_eq!(buf, &content[1000..2100]);
    assert_eq!(stream.position()?, 2100);
    Ok(())
}

#[test]
fn short_read_at_tail_then_end_of_stream() -> Result<()> {
    let dir = tempdir()?;
    let content = patterned(2600);
    let stream = reader_over(dir.path(), &content, CacheMode::SoftFlush)?;

    stream.set_position(2590)?;
    let mut buf = [0u8; 64];
    assert_eq!(stream.read_bytes(&mut buf)?, Some(10));
    assert_eq!(&buf[..10], &content[2590..]);
    assert_eq!(stream.read_bytes(&mut buf)?, None);
    Ok(())
}

#[test]
fn read_into_honours_offset_and_count() -> Result<()> {
    let dir = tempdir()?;
    let content = patterned(2600);
    let stream = reader_over(dir.path(), &content, CacheMode::SoftFlush)?;

    let mut buf = [0xAAu8; 16];
    assert_eq!(stream.read_into(&mut buf, 4, 8)?, Some(8));
    assert_eq!(&buf[..4], &[0xAA; 4]);
    assert_eq!(&buf[4..12], &content[..8]);
    assert_eq!(&buf[12..], &[0xAA; 4]);

    let err = stream.read_into(&mut buf, 10, 7).unwrap_err();
    assert!(matches!(err, StreamError::Range { .. }));
    assert_eq!(stream.position()?, 8, "rejected read does not move");
    Ok(())
}

#[test]
fn read_into_zero_count_at_end_of_stream() -> Result<()> {
    let dir = tempdir()?;
    let stream = reader_over(dir.path(), &patterned(100), CacheMode::SoftFlush)?;

    stream.set_position(100)?;
    let mut buf = [0u8; 4];
    assert_eq!(stream.read_into(&mut buf, 0, 0)?, Some(0));
    assert_eq!(stream.read_into(&mut buf, 0, 4)?, None);
    Ok(())
}

#[test]
fn skip_clamps_and_ignores_negative() -> Result<()> {
    let dir = tempdir()?;
    let stream = reader_over(dir.path(), &patterned(2600), CacheMode::SoftFlush)?;

    assert_eq!(stream.skip(-5)?, 0);
    assert_eq!(stream.skip(1500)?, 1500);
    assert_eq!(stream.current_slice_index()?, 1);
    assert_eq!(stream.skip(5000)?, 1100);
    assert_eq!(stream.position()?, 2600);
    assert_eq!(stream.skip(1)?, 0);
    Ok(())
}

// --------------------- Mark / reset ---------------------

#[test]
fn reset_without_mark_fails() -> Result<()> {
    let dir = tempdir()?;
    let stream = reader_over(dir.path(), &patterned(10), CacheMode::SoftFlush)?;
    assert!(matches!(stream.reset().unwrap_err(), StreamError::MarkNotSet));
    Ok(())
}

#[test]
fn mark_and_reset_across_boundaries() -> Result<()> {
    let dir = tempdir()?;
    let content = patterned(2600);
    let stream = reader_over(dir.path(), &content, CacheMode::SoftFlush)?;

    for mark_at in [0u64, 1023, 1024, 1025, 2599] {
        stream.set_position(mark_at)?;
        stream.mark()?;
        stream.skip(700)?;
        stream.reset()?;
        assert_eq!(stream.position()?, mark_at);
        assert_eq!(stream.read_byte()?, Some(content[mark_at as usize]));
    }
    Ok(())
}

// --------------------- Zero-copy slice access ---------------------

#[test]
fn current_slice_exposes_rest_of_slice() -> Result<()> {
    let dir = tempdir()?;
    let content = patterned(2600);
    let stream = reader_over(dir.path(), &content, CacheMode::SoftFlush)?;

    stream.set_position(1000)?;
    let bytes = stream.with_current_slice(<[u8]>::to_vec)?;
    assert_eq!(bytes, &content[1000..1024]);
    assert_eq!(stream.position()?, 1000);

    stream.set_position(2600)?;
    assert!(stream.with_current_slice(<[u8]>::is_empty)?);
    Ok(())
}

#[test]
fn next_slice_walks_to_the_last_slice() -> Result<()> {
    let dir = tempdir()?;
    let stream = reader_over(dir.path(), &patterned(2600), CacheMode::SoftFlush)?;

    stream.set_position(10)?;
    assert!(stream.next_slice()?);
    assert_eq!(stream.position()?, 1024);
    assert!(stream.next_slice()?);
    assert_eq!(stream.position()?, 2048);
    assert!(!stream.next_slice()?);
    assert_eq!(stream.position()?, 2048);
    Ok(())
}

// --------------------- External length changes ---------------------

#[test]
fn notify_length_change_sees_appended_bytes() -> Result<()> {
    let dir = tempdir()?;
    let content = patterned(2600);
    let path = file_with(dir.path(), "grow.bin", &content[..1000])?;
    let stream = MappedStream::open(File::open(&path)?, ro_config(CacheMode::SoftFlush))?;
    stream.set_position(1000)?;
    assert_eq!(stream.read_byte()?, None);

    let mut f = OpenOptions::new().append(true).open(&path)?;
    f.write_all(&content[1000..])?;
    f.sync_all()?;

    stream.notify_length_change(2600)?;
    assert_eq!(stream.length(), 2600);
    assert_eq!(stream.slice_count(), 3);
    let mut rest = Vec::new();
    stream.with_current_slice(|s| rest.extend_from_slice(s))?;
    assert_eq!(rest, &content[1000..1024]);

    let mut buf = vec![0u8; 1600];
    assert_eq!(stream.read_bytes(&mut buf)?, Some(1600));
    assert_eq!(buf, &content[1000..]);
    Ok(())
}

#[test]
fn length_past_end_of_file_fails_to_map() -> Result<()> {
    let dir = tempdir()?;
    let content = patterned(100);
    let stream = reader_over(dir.path(), &content, CacheMode::SoftFlush)?;

    // The file still has 100 bytes; nothing past them may be mapped.
    stream.notify_length_change(20_000)?;
    stream.set_position(10_000)?;
    assert!(matches!(stream.read_byte().unwrap_err(), StreamError::Map { .. }));
    stream.set_position(0)?;
    assert!(matches!(stream.read_byte().unwrap_err(), StreamError::Map { .. }));

    stream.notify_length_change(100)?;
    stream.set_position(0)?;
    let mut buf = vec![0u8; 100];
    assert_eq!(stream.read_bytes(&mut buf)?, Some(100));
    assert_eq!(buf, content);
    Ok(())
}

#[test]
fn notify_shrink_clamps_position_and_drops_mark() -> Result<()> {
    let dir = tempdir()?;
    let stream = reader_over(dir.path(), &patterned(2600), CacheMode::SoftFlush)?;

    stream.set_position(2500)?;
    stream.mark()?;
    stream.notify_length_change(1500)?;

    assert_eq!(stream.position()?, 1500);
    assert_eq!(stream.current_slice_index()?, 1);
    assert_eq!(stream.slice_count(), 2);
    assert!(matches!(stream.reset().unwrap_err(), StreamError::MarkNotSet));
    Ok(())
}

#[test]
fn set_length_without_resize_op_is_unsupported() -> Result<()> {
    let dir = tempdir()?;
    let path = file_with(dir.path(), "a.bin", &patterned(100))?;
    let stream = MappedStream::open(open_rw(&path)?, rw_config(CacheMode::SoftFlush))?;

    let err = stream.set_length(200).unwrap_err();
    assert!(matches!(err, StreamError::ResizeUnsupported));
    // Same length needs no resize.
    stream.set_length(100)?;
    Ok(())
}

// --------------------- std::io ---------------------

#[test]
fn io_read_and_seek() -> Result<()> {
    let dir = tempdir()?;
    let content = patterned(2600);
    let mut stream = reader_over(dir.path(), &content, CacheMode::SoftFlush)?;

    assert_eq!(stream.seek(SeekFrom::End(-10))?, 2590);
    let mut tail = Vec::new();
    stream.read_to_end(&mut tail)?;
    assert_eq!(tail, &content[2590..]);

    assert_eq!(stream.seek(SeekFrom::Current(-600))?, 2000);
    assert!(stream.seek(SeekFrom::Current(-3000)).is_err());
    let err = stream.seek(SeekFrom::Start(9999)).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);

    stream.seek(SeekFrom::Start(0))?;
    let mut all = Vec::new();
    stream.read_to_end(&mut all)?;
    assert_eq!(all, content);
    Ok(())
}

// --------------------- Close ---------------------

#[test]
fn operations_after_close_fail() -> Result<()> {
    let dir = tempdir()?;
    let stream = reader_over(dir.path(), &patterned(2600), CacheMode::SoftFlush)?;
    stream.read_byte()?;

    stream.close()?;
    assert!(stream.is_closed());
    assert!(matches!(stream.position().unwrap_err(), StreamError::Closed));
    assert!(matches!(stream.read_byte().unwrap_err(), StreamError::Closed));
    assert!(matches!(stream.mark().unwrap_err(), StreamError::Closed));
    assert_eq!(stream.length(), 2600);

    // Second close is a no-op.
    stream.close()?;

    let stats = stream.stats();
    assert!(stats.closed);
    assert_eq!(stats.mapped_slices, 0);
    assert_eq!(stats.live_evicted_slices, 0);
    Ok(())
}
