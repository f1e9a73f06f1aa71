//! Fuzz target for settings parsing.
//!
//! `OrchestratorSettings::from_json_str` must return an error, never panic,
//! on arbitrary input, and anything it accepts must survive a re-serialize.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replication_orchestrator::OrchestratorSettings;

fuzz_target!(|data: &str| {
    if let Ok(settings) = OrchestratorSettings::from_json_str(data) {
        // Accepted settings have parseable durations.
        let _ = settings.logical.interval_duration();
        let _ = settings.logical.lookback_duration();
        let _ = settings.physical.interval_duration();
        let _ = settings.shutdown.drain_timeout_duration();

        let json = serde_json::to_string(&settings).expect("settings serialize");
        assert!(OrchestratorSettings::from_json_str(&json).is_ok());
    }
});
