//! Runtime configuration.

pub const DEFAULT_MAX_KEY_LEN: usize = 128;

const DEV_DIAGNOSTICS_VAR: &str = "CANOPY_DEV_DIAGNOSTICS";
const MAX_KEY_LEN_VAR: &str = "CANOPY_MAX_KEY_LEN";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Enables development-only checks such as duplicate sibling keys and
    /// rejected key values.
    pub dev_diagnostics: bool,
    /// Keys longer than this many characters are truncated and suffixed with a
    /// digest of the full value.
    pub max_key_len: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dev_diagnostics: cfg!(debug_assertions),
            max_key_len: DEFAULT_MAX_KEY_LEN,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `CANOPY_DEV_DIAGNOSTICS` (`0`/`1`) and
    /// `CANOPY_MAX_KEY_LEN`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(DEV_DIAGNOSTICS_VAR) {
            match value.trim() {
                "1" | "true" => config.dev_diagnostics = true,
                "0" | "false" => config.dev_diagnostics = false,
                other => log::warn!("ignoring {DEV_DIAGNOSTICS_VAR}={other}"),
            }
        }
        if let Ok(value) = std::env::var(MAX_KEY_LEN_VAR) {
            match value.trim().parse::<usize>() {
                Ok(len) if len > 0 => config.max_key_len = len,
                _ => log::warn!("ignoring {MAX_KEY_LEN_VAR}={value}"),
            }
        }
        config
    }

    pub fn with_dev_diagnostics(mut self, enabled: bool) -> Self {
        self.dev_diagnostics = enabled;
        self
    }

    pub fn with_max_key_len(mut self, len: usize) -> Self {
        self.max_key_len = len.max(1);
        self
    }
}
