use lazy_static::lazy_static;
use prometheus::{IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    pub static ref ACTIVE_RECORDINGS: IntGauge =
        IntGauge::new("active_recordings", "running encoder jobs").unwrap();
    pub static ref SEGMENT_ROTATIONS: IntCounter =
        IntCounter::new("segment_rotations", "segment rotations").unwrap();
    pub static ref CLEANUP_FILES_REMOVED: IntCounter =
        IntCounter::new("cleanup_files_removed", "files deleted or archived by cleanup").unwrap();
    pub static ref CLEANUP_BYTES_RECLAIMED: IntCounter =
        IntCounter::new("cleanup_bytes_reclaimed", "bytes reclaimed by cleanup").unwrap();
    pub static ref SCHEDULE_TRIGGERS: IntCounter =
        IntCounter::new("schedule_triggers", "recordings started by a schedule").unwrap();
    pub static ref AUTORECORD_STARTS: IntCounter =
        IntCounter::new("autorecord_starts", "recordings started by the auto recorder").unwrap();
    pub static ref REGISTRY: Registry = {
        let registry = Registry::new_custom(Some("liverec".to_string()), None).unwrap();
        registry.register(Box::new(ACTIVE_RECORDINGS.clone())).unwrap();
        registry.register(Box::new(SEGMENT_ROTATIONS.clone())).unwrap();
        registry.register(Box::new(CLEANUP_FILES_REMOVED.clone())).unwrap();
        registry.register(Box::new(CLEANUP_BYTES_RECLAIMED.clone())).unwrap();
        registry.register(Box::new(SCHEDULE_TRIGGERS.clone())).unwrap();
        registry.register(Box::new(AUTORECORD_STARTS.clone())).unwrap();
        registry
    };
    pub static ref ENCODER: TextEncoder = TextEncoder::new();
}

/// Prometheus text exposition of every liverec metric
pub fn encode() -> String {
    ENCODER
        .encode_to_string(&REGISTRY.gather())
        .unwrap_or_default()
}
