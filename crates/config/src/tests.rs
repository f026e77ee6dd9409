use super::*;
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

// -------------------- Defaults --------------------

#[test]
fn default_is_read_only_soft_flush() {
    let cfg = StreamConfig::default();
    assert_eq!(cfg.map_mode, MapMode::ReadOnly);
    assert_eq!(cfg.cache_mode, CacheMode::SoftFlush);
    assert_eq!(cfg.slice_shift, DEFAULT_SLICE_SHIFT);
    assert!(!cfg.synchronous);
    assert!(cfg.hard_unmap);
    assert_eq!(cfg.soft_capacity, DEFAULT_SOFT_CAPACITY);
    assert!(cfg.validate().is_ok());
}

#[test]
fn default_slice_shift_follows_pointer_width() {
    if cfg!(target_pointer_width = "64") {
        assert_eq!(DEFAULT_SLICE_SHIFT, 30);
    } else {
        assert_eq!(DEFAULT_SLICE_SHIFT, 29);
    }
}

#[test]
fn builder_sets_fields() {
    let cfg = StreamConfig::read_write()
        .with_cache_mode(CacheMode::HardFlush)
        .with_slice_shift(10)
        .with_synchronous(true)
        .with_hard_unmap(false)
        .with_soft_capacity(1);

    assert_eq!(cfg.map_mode, MapMode::ReadWrite);
    assert_eq!(cfg.cache_mode, CacheMode::HardFlush);
    assert_eq!(cfg.slice_size(), 1024);
    assert!(cfg.synchronous);
    assert!(!cfg.hard_unmap);
    assert_eq!(cfg.soft_capacity, 1);
}

// -------------------- Validation --------------------

#[test]
fn validate_rejects_out_of_range_shift() {
    assert_eq!(
        StreamConfig::default().with_slice_shift(0).validate(),
        Err(ConfigError::SliceShift(0))
    );
    assert_eq!(
        StreamConfig::default().with_slice_shift(31).validate(),
        Err(ConfigError::SliceShift(31))
    );
    assert!(StreamConfig::default().with_slice_shift(MIN_SLICE_SHIFT).validate().is_ok());
    assert!(StreamConfig::default().with_slice_shift(MAX_SLICE_SHIFT).validate().is_ok());
}

// -------------------- Parsing --------------------

#[test]
fn modes_parse_and_display() {
    assert_eq!("rw".parse::<MapMode>().unwrap(), MapMode::ReadWrite);
    assert_eq!("Read-Only".parse::<MapMode>().unwrap(), MapMode::ReadOnly);
    assert_eq!("hard".parse::<CacheMode>().unwrap(), CacheMode::HardFlush);
    assert_eq!("NONE".parse::<CacheMode>().unwrap(), CacheMode::NoFlush);

    for mode in [CacheMode::NoFlush, CacheMode::SoftFlush, CacheMode::HardFlush] {
        assert_eq!(mode.to_string().parse::<CacheMode>().unwrap(), mode);
    }
    assert!("sideways".parse::<CacheMode>().is_err());
    assert!("wo".parse::<MapMode>().is_err());
}

#[test]
fn from_lookup_with_nothing_set_gives_defaults() {
    let cfg = StreamConfig::from_lookup(|_| None).unwrap();
    assert_eq!(cfg, StreamConfig::default());
}

#[test]
fn from_lookup_reads_every_key() {
    let cfg = StreamConfig::from_lookup(lookup_from(&[
        ("MMSTREAM_MAP_MODE", "rw"),
        ("MMSTREAM_CACHE_MODE", "hard"),
        ("MMSTREAM_SLICE_SHIFT", "12"),
        ("MMSTREAM_SYNC", "true"),
        ("MMSTREAM_SOFT_CAPACITY", "2"),
        ("MMSTREAM_HARD_UNMAP", "false"),
    ]))
    .unwrap();

    assert_eq!(cfg.map_mode, MapMode::ReadWrite);
    assert_eq!(cfg.cache_mode, CacheMode::HardFlush);
    assert_eq!(cfg.slice_shift, 12);
    assert!(cfg.synchronous);
    assert_eq!(cfg.soft_capacity, 2);
    assert!(!cfg.hard_unmap);
}

#[test]
fn from_lookup_rejects_garbage() {
    let err = StreamConfig::from_lookup(lookup_from(&[("MMSTREAM_SLICE_SHIFT", "big")]))
        .unwrap_err();
    assert_eq!(
        err,
        ConfigError::InvalidValue {
            key: "MMSTREAM_SLICE_SHIFT".to_string(),
            value: "big".to_string(),
        }
    );

    let err = StreamConfig::from_lookup(lookup_from(&[("MMSTREAM_SLICE_SHIFT", "40")]))
        .unwrap_err();
    assert_eq!(err, ConfigError::SliceShift(40));
}
