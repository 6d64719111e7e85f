use crate::application::consumer::ConsumerSettings;
use crate::application::session::{ReconnectPolicy, SessionSettings};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct RealtimeConfig {
    pub server: ServerSettings,
    pub stream: StreamSettings,
    pub output: OutputSettings,
    pub reconnect: ReconnectSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamSettings {
    /// Beam tracked by the time-series product
    pub beam: u32,
    pub max_beams: usize,
    pub max_gates: u32,
    pub stale_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub max_frame_bytes: usize,
    pub max_consecutive_decode_failures: usize,
    pub time_series_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputSettings {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectSettings {
    pub enabled: bool,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: Option<u32>,
}

type Builder = config::ConfigBuilder<config::builder::DefaultState>;

fn builder() -> Result<Builder, config::ConfigError> {
    config::Config::builder()
        .set_default("server.host", "localhost")?
        .set_default("server.port", 6040)?
        .set_default("stream.beam", 7)?
        .set_default("stream.max_beams", 16)?
        .set_default("stream.max_gates", 75)?
        .set_default("stream.stale_timeout_secs", 300)?
        .set_default("stream.poll_interval_ms", 1000)?
        .set_default("stream.max_frame_bytes", 1_048_576)?
        .set_default("stream.max_consecutive_decode_failures", 50)?
        .set_default("stream.time_series_capacity", 720)?
        .set_default("output.path", "plots")?
        .set_default("reconnect.enabled", true)?
        .set_default("reconnect.initial_delay_ms", 1000)?
        .set_default("reconnect.max_delay_ms", 60_000)
}

/// Defaults, then `config/realtime.*` if present, then `REALTIME__SECTION__KEY` overrides
pub fn load_realtime_config() -> anyhow::Result<RealtimeConfig> {
    let settings = builder()?
        .add_source(config::File::with_name("config/realtime").required(false))
        .add_source(
            config::Environment::with_prefix("REALTIME")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config: RealtimeConfig = settings.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

impl RealtimeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let stream = &self.stream;
        if stream.max_beams == 0 {
            anyhow::bail!("stream.max_beams must be positive");
        }
        if stream.max_gates == 0 {
            anyhow::bail!("stream.max_gates must be positive");
        }
        if stream.beam as usize >= stream.max_beams {
            anyhow::bail!(
                "stream.beam {} is outside 0..{}",
                stream.beam,
                stream.max_beams
            );
        }
        if stream.stale_timeout_secs == 0 {
            anyhow::bail!("stream.stale_timeout_secs must be positive");
        }
        let stale_after = Duration::from_secs(stream.stale_timeout_secs);
        if stream.poll_interval_ms == 0 || Duration::from_millis(stream.poll_interval_ms) > stale_after {
            anyhow::bail!("stream.poll_interval_ms must be between 1 and the staleness timeout");
        }
        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        let stream = &self.stream;
        SessionSettings {
            target_beam: stream.beam,
            max_beams: stream.max_beams,
            max_gates: stream.max_gates,
            time_series_capacity: stream.time_series_capacity,
            max_frame_bytes: stream.max_frame_bytes,
            max_consecutive_decode_failures: stream.max_consecutive_decode_failures,
            consumer: ConsumerSettings {
                stale_after: Duration::from_secs(stream.stale_timeout_secs),
                poll_interval: Duration::from_millis(stream.poll_interval_ms),
            },
            reconnect: ReconnectPolicy {
                enabled: self.reconnect.enabled,
                initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
                max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
                max_attempts: self.reconnect.max_attempts,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn from_toml(toml: &str) -> RealtimeConfig {
        builder()
            .unwrap()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = from_toml("");
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 6040);
        assert_eq!(config.stream.max_beams, 16);
        assert_eq!(config.reconnect.max_attempts, None);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let config = from_toml(
            r#"
            [server]
            host = "superdarn.example.org"
            port = 7000

            [stream]
            beam = 3
            stale_timeout_secs = 60

            [reconnect]
            enabled = false
            max_attempts = 4
            "#,
        );

        assert_eq!(config.server.host, "superdarn.example.org");
        assert_eq!(config.stream.beam, 3);
        assert_eq!(config.stream.max_gates, 75);

        let session = config.session_settings();
        assert_eq!(session.consumer.stale_after, Duration::from_secs(60));
        assert!(!session.reconnect.enabled);
        assert_eq!(session.reconnect.max_attempts, Some(4));
    }

    #[test]
    fn test_rejects_beam_outside_scan() {
        let config = from_toml("[stream]\nbeam = 16\nmax_beams = 16\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_staleness_timeout_is_accepted() {
        let config = from_toml("[stream]\nstale_timeout_secs = 9223372036854775807\n");
        assert!(config.validate().is_ok());
        assert_eq!(
            config.session_settings().consumer.stale_after,
            Duration::from_secs(i64::MAX as u64)
        );
    }

    #[test]
    fn test_rejects_poll_longer_than_timeout() {
        let config = from_toml("[stream]\nstale_timeout_secs = 1\npoll_interval_ms = 5000\n");
        assert!(config.validate().is_err());
    }
}
