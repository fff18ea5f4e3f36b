//! Runtime configuration.
//!
//! Defaults suit a single-process deployment; every knob can be set
//! programmatically or resolved from the environment (a `.env` file is
//! honored via `dotenvy`). Per-flow [`FlowSettings`](crate::flows::FlowSettings)
//! override the TTL, step cap, and rate ceiling for their own conversations.

use crate::dispatch::DispatchConfig;
use crate::engine::EngineConfig;

#[derive(Clone, Copy, Debug)]
pub struct RuntimeConfig {
    /// Session TTL for flows that do not set their own, in seconds.
    pub default_ttl_secs: u64,
    pub engine: EngineConfig,
    pub dispatch: DispatchConfig,
    /// How often the expiry sweeper scans, in seconds.
    pub sweep_interval_secs: u64,
    /// How often pending DELAY resumes are polled, in seconds.
    pub resume_poll_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 24 * 60 * 60,
            engine: EngineConfig::default(),
            dispatch: DispatchConfig::default(),
            sweep_interval_secs: 60,
            resume_poll_secs: 5,
        }
    }
}

impl RuntimeConfig {
    /// Resolve overrides from the environment on top of the defaults.
    ///
    /// Recognized variables: `CHATFLOW_DEFAULT_TTL_SECS`,
    /// `CHATFLOW_STEP_CAP`, `CHATFLOW_ACTION_TIMEOUT_MS`,
    /// `CHATFLOW_SWEEP_INTERVAL_SECS`, `CHATFLOW_RESUME_POLL_SECS`.
    /// Unparseable values fall back to the default.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Some(ttl) = env_parse("CHATFLOW_DEFAULT_TTL_SECS") {
            config.default_ttl_secs = ttl;
        }
        if let Some(cap) = env_parse("CHATFLOW_STEP_CAP") {
            config.engine.step_cap = cap;
        }
        if let Some(ms) = env_parse("CHATFLOW_ACTION_TIMEOUT_MS") {
            config.engine.action_timeout_ms = ms;
        }
        if let Some(secs) = env_parse("CHATFLOW_SWEEP_INTERVAL_SECS") {
            config.sweep_interval_secs = secs;
        }
        if let Some(secs) = env_parse("CHATFLOW_RESUME_POLL_SECS") {
            config.resume_poll_secs = secs;
        }
        config
    }

    #[must_use]
    pub fn with_default_ttl_secs(mut self, secs: u64) -> Self {
        self.default_ttl_secs = secs;
        self
    }

    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    #[must_use]
    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}
