//! Operational caps and defaults.

use std::time::Duration;

use serde::Deserialize;

/// Numeric caps applied across inspection and memory operations.
///
/// All fields have working defaults; embedders may deserialize
/// overrides from their own configuration layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Limits {
    /// Hard cap for one raw memory read.
    pub max_memory_read: usize,
    /// Memory read size when the caller omits one.
    pub default_memory_read: usize,
    /// Per-object field fan-out cap during object inspection.
    pub max_object_fields: usize,
    /// Maximum object-inspection depth.
    pub max_inspect_depth: u32,
    /// Object-inspection depth when the caller omits one.
    pub default_inspect_depth: u32,
    /// Maximum frames returned by one stack walk.
    pub max_stack_frames: usize,
    /// Frames returned when the caller omits a count.
    pub default_stack_frames: usize,
    /// Cap on search results and type-listing pages.
    pub max_search_results: usize,
    /// Cap on reference enumeration results.
    pub max_references: usize,
    /// Reference results when the caller omits a count.
    pub default_references: usize,
    /// Display truncation for string values.
    pub string_display_max: usize,
    /// Step completion deadline, milliseconds.
    pub step_timeout_ms: u64,
    /// Attach deadline, milliseconds.
    pub attach_timeout_ms: u64,
    /// Deadline for in-target function evaluation, milliseconds.
    pub eval_timeout_ms: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_memory_read: 65536,
            default_memory_read: 256,
            max_object_fields: 100,
            max_inspect_depth: 10,
            default_inspect_depth: 1,
            max_stack_frames: 1000,
            default_stack_frames: 20,
            max_search_results: 100,
            max_references: 100,
            default_references: 50,
            string_display_max: 1000,
            step_timeout_ms: 10_000,
            attach_timeout_ms: 30_000,
            eval_timeout_ms: 5_000,
        }
    }
}

impl Limits {
    /// Step completion deadline.
    #[must_use]
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    /// Attach deadline.
    #[must_use]
    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }

    /// In-target evaluation deadline.
    #[must_use]
    pub fn eval_timeout(&self) -> Duration {
        Duration::from_millis(self.eval_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_caps() {
        let limits = Limits::default();
        assert_eq!(limits.max_memory_read, 65536);
        assert_eq!(limits.default_memory_read, 256);
        assert_eq!(limits.max_inspect_depth, 10);
        assert_eq!(limits.max_object_fields, 100);
        assert_eq!(limits.default_stack_frames, 20);
        assert_eq!(limits.max_stack_frames, 1000);
    }

    #[test]
    fn overrides_deserialize_over_defaults() {
        let limits: Limits =
            serde_json::from_str(r#"{"max-memory-read": 1024, "step-timeout-ms": 50}"#).unwrap();
        assert_eq!(limits.max_memory_read, 1024);
        assert_eq!(limits.step_timeout(), Duration::from_millis(50));
        assert_eq!(limits.default_memory_read, 256);
    }
}
