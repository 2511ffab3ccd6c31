//! Frame metadata: capture timing, numbering, and the open map of named
//! numeric fields sensors attach (exposure, laser power, temperature, ...).

use std::collections::HashMap;

use crate::core::streams::StreamProfile;

/// Clock source a frame timestamp was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampDomain {
    /// Device hardware clock.
    HardwareClock,
    /// Host system clock, used when hardware timestamps are unavailable.
    SystemTime,
    /// Host clock adjusted to track the hardware clock.
    GlobalTime,
}

#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// The stream this frame belongs to.
    pub profile: StreamProfile,
    /// Capture timestamp in nanoseconds within `domain`.
    pub timestamp_ns: i64,
    pub domain: TimestampDomain,
    /// Monotonically increasing per stream.
    pub frame_number: u64,
    fields: HashMap<String, f64>,
}

impl FrameMetadata {
    pub fn new(profile: StreamProfile) -> Self {
        Self {
            profile,
            timestamp_ns: 0,
            domain: TimestampDomain::SystemTime,
            frame_number: 0,
            fields: HashMap::new(),
        }
    }

    /// Whether a named numeric field was attached by the producer.
    pub fn supports_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: f64) {
        self.fields.insert(name.into(), value);
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, f64)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::streams::{PixelFormat, StreamKind};

    #[test]
    fn named_fields_roundtrip() {
        let profile = StreamProfile::video(StreamKind::Depth, 0, PixelFormat::Z16, 640, 480, 30);
        let mut meta = FrameMetadata::new(profile);
        assert!(!meta.supports_field("actual-exposure"));
        meta.set_field("actual-exposure", 8500.0);
        assert!(meta.supports_field("actual-exposure"));
        assert_eq!(meta.field("actual-exposure"), Some(8500.0));
        assert_eq!(meta.field("laser-power"), None);
    }
}
