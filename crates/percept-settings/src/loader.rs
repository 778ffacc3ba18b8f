//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PerceptSettings::default()`]
//! 2. If `~/.percept/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{CaptureStrategy, PerceptSettings};

/// Resolve the path to the settings file (`~/.percept/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".percept").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PerceptSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or invalid values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<PerceptSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<PerceptSettings> {
    let defaults = serde_json::to_value(PerceptSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Reject values the pipeline cannot run with.
pub fn validate(settings: &PerceptSettings) -> Result<()> {
    let session = &settings.session;
    if session.capture_interval_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "session.captureIntervalMs must be positive".into(),
        ));
    }
    let capacities = [
        ("transcriptionCapacity", session.transcription_capacity),
        ("interruptionCapacity", session.interruption_capacity),
        ("visualCapacity", session.visual_capacity),
        ("intentionCapacity", session.intention_capacity),
        ("commandCapacity", session.command_capacity),
        ("outboundCapacity", session.outbound_capacity),
    ];
    for (name, value) in capacities {
        if value == 0 {
            return Err(SettingsError::InvalidValue(format!(
                "session.{name} must be positive"
            )));
        }
    }
    if session.status_interval_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "session.statusIntervalSecs must be positive".into(),
        ));
    }
    if settings.server.heartbeat_interval_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "server.heartbeatIntervalSecs must be positive".into(),
        ));
    }
    if settings.speech.connect_timeout_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "speech.connectTimeoutMs must be positive".into(),
        ));
    }
    for (name, value) in [
        ("speech.confidenceThreshold", settings.speech.confidence_threshold),
        ("intention.actionThreshold", settings.intention.action_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(SettingsError::InvalidValue(format!(
                "{name} must be within [0, 1]"
            )));
        }
    }
    Ok(())
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut PerceptSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` instead of the process environment.
pub fn apply_overrides_from(settings: &mut PerceptSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = Overrides { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("PERCEPT_HOST") {
        settings.server.host = v;
    }
    // PERCEPT_PORT wins over the platform-provided PORT.
    if let Some(v) = env
        .ranged("PERCEPT_PORT", 1..=u16::MAX)
        .or_else(|| env.ranged("PORT", 1..=u16::MAX))
    {
        settings.server.port = v;
    }
    if let Some(v) = env.ranged("PERCEPT_MAX_SESSIONS", 1..=10_000) {
        settings.server.max_sessions = v;
    }

    // ── Session pipeline ────────────────────────────────────────────
    if let Some(v) = env.parsed("PERCEPT_CAPTURE_STRATEGY", "push|timer", parse_capture_strategy) {
        settings.session.capture_strategy = v;
    }
    if let Some(v) = env.ranged("PERCEPT_CAPTURE_INTERVAL_MS", 100..=3_600_000) {
        settings.session.capture_interval_ms = v;
    }

    // ── Speech ──────────────────────────────────────────────────────
    if let Some(v) = env.string("PERCEPT_SPEECH_LANGUAGE") {
        settings.speech.language = v;
    }
    if let Some(v) = env.ranged("PERCEPT_UTTERANCE_END_MS", 1000..=5000) {
        settings.speech.utterance_end_ms = Some(v);
    }
    if let Some(v) = env.ranged("PERCEPT_CONFIDENCE_THRESHOLD", 0.0..=1.0) {
        settings.speech.confidence_threshold = v;
    }
    if let Some(v) = env.ranged("PERCEPT_SPEECH_CONNECT_TIMEOUT_MS", 100..=120_000) {
        settings.speech.connect_timeout_ms = v;
    }

    // ── Intention ───────────────────────────────────────────────────
    if let Some(v) = env.ranged("PERCEPT_ACTION_THRESHOLD", 0.0..=1.0) {
        settings.intention.action_threshold = v;
    }
    if let Some(v) = env.parsed("PERCEPT_SNAPSHOT_CONTEXT", "boolean", parse_bool) {
        settings.intention.snapshot_context = v;
    }

    // ── Downstream services ─────────────────────────────────────────
    if let Some(v) = env.string("PINECONE_INDEX_HOST") {
        settings.vector_store.index_host = Some(v);
    }
    if let Some(v) = env.string("ORCHESTRATOR_ENDPOINT") {
        settings.orchestrator.endpoint = Some(v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("PERCEPT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("PERCEPT_LOG_JSON", "boolean", parse_bool) {
        settings.logging.json = v;
    }
}

/// Parse a boolean flag: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a number and keep it only if it lies within `range`.
///
/// `NaN` never lies within a range, so float overrides are always finite.
pub fn parse_in_range<T>(val: &str, range: &RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.parse().ok().filter(|n| range.contains(n))
}

/// Parse a capture strategy name (`push` or `timer`).
pub fn parse_capture_strategy(val: &str) -> Option<CaptureStrategy> {
    match val.to_ascii_lowercase().as_str() {
        "push" => Some(CaptureStrategy::Push),
        "timer" | "ticker" => Some(CaptureStrategy::Timer),
        _ => None,
    }
}

/// Override values read through a lookup; unset and blank values are absent.
struct Overrides<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Overrides<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn parsed<T>(
        &self,
        name: &str,
        expected: &'static str,
        parse: impl FnOnce(&str) -> Option<T>,
    ) -> Option<T> {
        let raw = self.string(name)?;
        let value = parse(raw.trim());
        if value.is_none() {
            tracing::warn!(key = name, value = %raw, expected, "invalid env override, ignoring");
        }
        value
    }

    fn ranged<T>(&self, name: &str, range: RangeInclusive<T>) -> Option<T>
    where
        T: FromStr + PartialOrd,
    {
        self.parsed(name, "number in range", |v| parse_in_range(v, &range))
    }
}
