//! Session tunables.
//!
//! ## Sources (later wins)
//!
//! | Source                          | Example                               |
//! |---------------------------------|---------------------------------------|
//! | built-in defaults               | see table below                       |
//! | TOML file (optional)            | `tick_interval_ms = 25`               |
//! | environment, prefix `MC_SESSION` | `MC_SESSION_LOG_CAPACITY=500`        |
//!
//! | Key                 | Default          | Description                        |
//! |---------------------|------------------|------------------------------------|
//! | `tick_interval_ms`  | `50`             | Tick loop period                   |
//! | `log_capacity`      | `100`            | Retained log entries               |
//! | `event_buffer`      | `1024`           | Depth of `Session::subscribe` channels |
//! | `disconnect_reason` | `Disconnected.`  | Reason sent on graceful close      |

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::log_buffer::DEFAULT_LOG_CAPACITY;

pub const ENV_PREFIX: &str = "MC_SESSION";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub tick_interval_ms: u64,
    pub log_capacity: usize,
    pub event_buffer: usize,
    pub disconnect_reason: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            log_capacity: DEFAULT_LOG_CAPACITY,
            event_buffer: 1024,
            disconnect_reason: "Disconnected.".to_string(),
        }
    }
}

impl SessionConfig {
    /// Layer defaults, an optional TOML file and `MC_SESSION_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, SessionError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let cfg: SessionConfig = builder.build()?.try_deserialize()?;
        log::debug!("loaded session config: {:?}", cfg);
        Ok(cfg)
    }

    /// Never zero; a zero period would spin the tick thread.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}
