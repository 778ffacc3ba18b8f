//! # percept-settings
//!
//! Configuration for the perception session server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PerceptSettings::default()`]
//! 2. **User file**: `~/.percept/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `PERCEPT_*` overrides (highest priority)
//!
//! API keys never live in the settings file; [`Credentials`] reads them from
//! the environment.

#![deny(unsafe_code)]

pub mod credentials;
pub mod errors;
pub mod loader;
pub mod types;

pub use credentials::Credentials;
pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_service_defaults() {
        let s = PerceptSettings::default();
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.session.capture_interval_ms, 10_000);
        assert_eq!(s.session.audio_interval_ms, 100);
        assert_eq!(s.session.transcription_capacity, 100);
        assert_eq!(s.session.intention_capacity, 10);
        assert!((s.speech.confidence_threshold - 0.3).abs() < f64::EPSILON);
        assert!((s.intention.action_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(s.intention.context_top_k, 5);
        assert_eq!(s.vision.model, "gpt-4o");
        assert!(s.orchestrator.endpoint.is_none());
    }
}
