use crate::defaults;
use crate::error::{PaceError, Result};
use crate::pacing::frame::FrameFormat;
use crate::pacing::scheduler::SchedulerConfig;
use crate::transport::backoff::Backoff;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub pacing: PacingConfig,
    pub transport: TransportConfig,
}

/// Frame geometry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_duration_ms: u32,
    pub bytes_per_sample: u16,
}

/// Buffering and timing policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PacingConfig {
    pub max_queue_length: usize,
    pub overflow_buffer_multiplier: usize,
    pub drift_recovery_threshold_ms: u64,
    pub drain_timeout_ms: u64,
}

/// Wire protocol spoken to the producer and the consumer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Raw byte stream
    #[default]
    Tcp,
    /// Binary WebSocket messages; text messages count as malformed input
    WebSocket,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::WebSocket => write!(f, "websocket"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = PaceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "websocket" | "ws" => Ok(TransportKind::WebSocket),
            other => Err(invalid(
                "transport.kind",
                &format!("unknown transport '{}', expected tcp or websocket", other),
            )),
        }
    }
}

/// Upstream and downstream endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub source_addr: String,
    pub sink_addr: String,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub sink_channel_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            frame_duration_ms: defaults::FRAME_DURATION_MS,
            bytes_per_sample: defaults::BYTES_PER_SAMPLE,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            max_queue_length: defaults::MAX_QUEUE_LENGTH,
            overflow_buffer_multiplier: defaults::OVERFLOW_BUFFER_MULTIPLIER,
            drift_recovery_threshold_ms: defaults::DRIFT_RECOVERY_THRESHOLD_MS,
            drain_timeout_ms: defaults::DRAIN_TIMEOUT_MS,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            source_addr: defaults::SOURCE_ADDR.to_string(),
            sink_addr: defaults::SINK_ADDR.to_string(),
            reconnect_base_ms: defaults::RECONNECT_BASE_MS,
            reconnect_max_ms: defaults::RECONNECT_MAX_MS,
            sink_channel_capacity: defaults::SINK_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PaceError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                PaceError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(PaceError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - FRAMEPACE_SAMPLE_RATE → audio.sample_rate
    /// - FRAMEPACE_FRAME_DURATION_MS → audio.frame_duration_ms
    /// - FRAMEPACE_SOURCE_ADDR → transport.source_addr
    /// - FRAMEPACE_SINK_ADDR → transport.sink_addr
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(rate) = env_number("FRAMEPACE_SAMPLE_RATE", "audio.sample_rate")? {
            self.audio.sample_rate = rate;
        }

        if let Some(ms) = env_number("FRAMEPACE_FRAME_DURATION_MS", "audio.frame_duration_ms")? {
            self.audio.frame_duration_ms = ms;
        }

        if let Ok(addr) = std::env::var("FRAMEPACE_SOURCE_ADDR")
            && !addr.is_empty()
        {
            self.transport.source_addr = addr;
        }

        if let Ok(addr) = std::env::var("FRAMEPACE_SINK_ADDR")
            && !addr.is_empty()
        {
            self.transport.sink_addr = addr;
        }

        if let Ok(kind) = std::env::var("FRAMEPACE_TRANSPORT")
            && !kind.is_empty()
        {
            self.transport.kind = kind.parse()?;
        }

        Ok(self)
    }

    /// Rejects values the pacing components cannot run with.
    pub fn validate(&self) -> Result<()> {
        let format = self.frame_format()?;
        if self.pacing.max_queue_length == 0 {
            return Err(invalid("pacing.max_queue_length", "must be at least 1"));
        }
        if self.pacing.overflow_buffer_multiplier == 0 {
            return Err(invalid(
                "pacing.overflow_buffer_multiplier",
                "must be at least 1",
            ));
        }
        if format
            .frame_size()
            .checked_mul(self.pacing.overflow_buffer_multiplier)
            .is_none()
        {
            return Err(invalid(
                "pacing.overflow_buffer_multiplier",
                &format!(
                    "{} x {}-byte frames does not fit in memory",
                    self.pacing.overflow_buffer_multiplier,
                    format.frame_size()
                ),
            ));
        }
        if self.transport.reconnect_base_ms == 0 {
            return Err(invalid("transport.reconnect_base_ms", "must be positive"));
        }
        if self.transport.reconnect_max_ms < self.transport.reconnect_base_ms {
            return Err(invalid(
                "transport.reconnect_max_ms",
                "must not be below reconnect_base_ms",
            ));
        }
        if self.transport.sink_channel_capacity == 0 {
            return Err(invalid("transport.sink_channel_capacity", "must be at least 1"));
        }
        Ok(())
    }

    pub fn frame_format(&self) -> Result<FrameFormat> {
        FrameFormat::new(
            self.audio.sample_rate,
            self.audio.frame_duration_ms,
            self.audio.bytes_per_sample,
        )
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_millis(self.audio.frame_duration_ms as u64),
            drift_recovery_threshold: Duration::from_millis(self.pacing.drift_recovery_threshold_ms),
            max_queue_length: self.pacing.max_queue_length,
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.transport.reconnect_base_ms),
            Duration::from_millis(self.transport.reconnect_max_ms),
        )
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.pacing.drain_timeout_ms)
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/framepace/config.toml on Linux
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().ok_or_else(|| {
            PaceError::Other("Could not determine config directory".to_string())
        })?;
        Ok(dir.join("framepace").join("config.toml"))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PaceError::ConfigParse {
            message: e.to_string(),
        })
    }
}

fn env_number<T: std::str::FromStr>(var: &str, key: &str) -> Result<Option<T>> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(key, &format!("{}={:?} is not a number", var, value))),
        _ => Ok(None),
    }
}

fn invalid(key: &str, message: &str) -> PaceError {
    PaceError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_framepace_env() {
        remove_env("FRAMEPACE_SAMPLE_RATE");
        remove_env("FRAMEPACE_FRAME_DURATION_MS");
        remove_env("FRAMEPACE_SOURCE_ADDR");
        remove_env("FRAMEPACE_SINK_ADDR");
        remove_env("FRAMEPACE_TRANSPORT");
    }

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.audio.sample_rate, 8000);
        assert_eq!(config.audio.frame_duration_ms, 60);
        assert_eq!(config.audio.bytes_per_sample, 2);

        assert_eq!(config.pacing.max_queue_length, 500);
        assert_eq!(config.pacing.overflow_buffer_multiplier, 100);
        assert_eq!(config.pacing.drift_recovery_threshold_ms, 500);

        assert_eq!(config.transport.source_addr, "127.0.0.1:9000");
        assert_eq!(config.transport.sink_addr, "127.0.0.1:9001");

        assert_eq!(config.frame_format().unwrap().frame_size(), 960);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_temp(
            r#"
            [audio]
            sample_rate = 16000
            frame_duration_ms = 20

            [pacing]
            max_queue_length = 50
            drift_recovery_threshold_ms = 250

            [transport]
            source_addr = "10.0.0.1:7000"
            sink_channel_capacity = 4
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.frame_duration_ms, 20);
        assert_eq!(config.audio.bytes_per_sample, 2);
        assert_eq!(config.pacing.max_queue_length, 50);
        assert_eq!(config.transport.source_addr, "10.0.0.1:7000");
        assert_eq!(config.transport.sink_addr, "127.0.0.1:9001");
        assert_eq!(config.transport.sink_channel_capacity, 4);

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.interval, Duration::from_millis(20));
        assert_eq!(scheduler.drift_recovery_threshold, Duration::from_millis(250));
        assert_eq!(scheduler.max_queue_length, 50);
        assert_eq!(config.frame_format().unwrap().frame_size(), 640);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_temp("[audio\nsample_rate = ");
        assert!(matches!(
            Config::load(temp_file.path()),
            Err(PaceError::Config(_))
        ));
        // Present but broken is still an error with load_or_default
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let missing = Path::new("/tmp/nonexistent_framepace_config_12345.toml");
        assert!(matches!(
            Config::load(missing),
            Err(PaceError::ConfigFileNotFound { .. })
        ));
        assert_eq!(Config::load_or_default(missing).unwrap(), Config::default());
    }

    #[test]
    fn test_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_framepace_env();

        set_env("FRAMEPACE_SAMPLE_RATE", "16000");
        set_env("FRAMEPACE_FRAME_DURATION_MS", "20");
        set_env("FRAMEPACE_SINK_ADDR", "127.0.0.1:7777");
        let config = Config::default().with_env_overrides().unwrap();

        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.frame_duration_ms, 20);
        assert_eq!(config.transport.sink_addr, "127.0.0.1:7777");
        assert_eq!(config.transport.source_addr, "127.0.0.1:9000");

        clear_framepace_env();
    }

    #[test]
    fn test_transport_kind_from_env_and_toml() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_framepace_env();

        assert_eq!(Config::default().transport.kind, TransportKind::Tcp);

        let parsed: Config = toml::from_str("[transport]\nkind = \"websocket\"\n").unwrap();
        assert_eq!(parsed.transport.kind, TransportKind::WebSocket);
        assert!(parsed.to_toml().unwrap().contains("kind = \"websocket\""));

        set_env("FRAMEPACE_TRANSPORT", "ws");
        let config = Config::default().with_env_overrides().unwrap();
        assert_eq!(config.transport.kind, TransportKind::WebSocket);

        set_env("FRAMEPACE_TRANSPORT", "carrier-pigeon");
        assert!(matches!(
            Config::default().with_env_overrides(),
            Err(PaceError::ConfigInvalidValue { key, .. }) if key == "transport.kind"
        ));

        clear_framepace_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_framepace_env();

        set_env("FRAMEPACE_SAMPLE_RATE", "");
        set_env("FRAMEPACE_SOURCE_ADDR", "");
        let config = Config::default().with_env_overrides().unwrap();

        assert_eq!(config, Config::default());

        clear_framepace_env();
    }

    #[test]
    fn test_env_override_rejects_garbage_number() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_framepace_env();

        set_env("FRAMEPACE_FRAME_DURATION_MS", "sixty");
        let result = Config::default().with_env_overrides();

        match result {
            Err(PaceError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "audio.frame_duration_ms")
            }
            other => panic!("expected ConfigInvalidValue, got {:?}", other),
        }

        clear_framepace_env();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.audio.frame_duration_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pacing.max_queue_length = 0;
        assert!(matches!(
            config.validate(),
            Err(PaceError::ConfigInvalidValue { key, .. }) if key == "pacing.max_queue_length"
        ));

        let mut config = Config::default();
        config.transport.reconnect_max_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_multiplier_overflowing_buffer_size() {
        let mut config = Config::default();
        config.pacing.overflow_buffer_multiplier = usize::MAX / 2;
        assert!(matches!(
            config.validate(),
            Err(PaceError::ConfigInvalidValue { key, .. }) if key == "pacing.overflow_buffer_multiplier"
        ));

        let toml = format!(
            "[pacing]\noverflow_buffer_multiplier = {}\n",
            i64::MAX
        );
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert!(parsed.validate().is_err());
    }

    #[test]
    fn test_to_toml_round_trips_through_load() {
        let mut config = Config::default();
        config.transport.sink_addr = "192.168.1.5:9001".to_string();
        let temp_file = write_temp(&config.to_toml().unwrap());
        assert_eq!(Config::load(temp_file.path()).unwrap(), config);
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        let path = Config::default_path().unwrap();
        let path_str = path.to_string_lossy();
        assert!(path_str.contains("framepace"));
        assert!(path_str.ends_with("config.toml"));
    }
}
