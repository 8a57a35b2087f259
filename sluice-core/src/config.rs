//! Service configuration.
//!
//! Read from `sluice.toml` under the data path; a missing file means
//! defaults. CLI flags override individual values after loading. Sizes
//! are written as strings with K/M/G/T suffixes and parsed on use.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

/// Default CDN endpoint sources are fetched from.
pub const DEFAULT_CDN: &str = "https://cdn.lbryplayer.xyz/api/v3/streams";

/// Errors from loading or interpreting configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file exists but could not be read.
    #[error("could not read config: {0}")]
    Read(#[from] std::io::Error),

    /// Config file is not valid TOML.
    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A size string is malformed.
    #[error("invalid size string {input:?}")]
    Size {
        /// The offending input.
        input: String,
    },
}

/// Top-level service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SluiceConfig {
    /// CDN endpoint sources are fetched from.
    pub cdn_server: String,
    /// Channels allowed to be transcoded; empty admits everything.
    pub enabled_channels: Vec<String>,
    /// Hot-tier settings.
    pub local: LocalSection,
    /// Warm-tier settings; absent disables the object store.
    pub wasabi: Option<WasabiSection>,
    /// Admission loop settings.
    pub sweeper: SweeperSection,
}

impl Default for SluiceConfig {
    fn default() -> Self {
        Self {
            cdn_server: DEFAULT_CDN.to_owned(),
            enabled_channels: Vec::new(),
            local: LocalSection::default(),
            wasabi: None,
            sweeper: SweeperSection::default(),
        }
    }
}

/// Hot-tier configuration section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalSection {
    /// Hot-tier ceiling as a size string.
    pub max_size: String,
}

impl Default for LocalSection {
    fn default() -> Self {
        Self {
            max_size: "200G".to_owned(),
        }
    }
}

/// Warm-tier (S3-compatible) configuration section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WasabiSection {
    /// Access key id.
    pub key: String,
    /// Secret access key.
    pub secret: String,
    /// Bucket name.
    pub bucket: String,
    /// Warm-tier ceiling as a size string.
    #[serde(default = "default_remote_size")]
    pub max_size: String,
    /// S3-compatible endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Bucket region.
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_remote_size() -> String {
    "900G".to_owned()
}

fn default_endpoint() -> String {
    "https://s3.eu-central-1.wasabisys.com".to_owned()
}

fn default_region() -> String {
    "eu-central-1".to_owned()
}

/// Admission loop configuration section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweeperSection {
    /// Minutes between sweeps.
    pub interval_minutes: u64,
    /// Minimum hit count a stream must exceed to be admitted.
    pub lower_bound: u64,
    /// Maximum number of streams admitted per sweep.
    pub top_number: usize,
}

impl Default for SweeperSection {
    fn default() -> Self {
        Self {
            interval_minutes: 10,
            lower_bound: 10,
            top_number: 20,
        }
    }
}

impl SweeperSection {
    /// Sweep interval as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

impl SluiceConfig {
    /// Loads configuration from `path`. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Read` - file exists but cannot be read
    /// - `ConfigError::Parse` - file is not valid TOML
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        info!(path = %path.display(), "config loaded");
        Ok(config)
    }
}

/// Parses a size string: a decimal number with an optional K/M/G/T
/// suffix in multiples of 1024. A bare number is bytes.
///
/// # Errors
///
/// - `ConfigError::Size` - empty input, unknown suffix, or bad number
pub fn parse_size(input: &str) -> Result<u64, ConfigError> {
    let trimmed = input.trim();
    let err = || ConfigError::Size {
        input: input.to_owned(),
    };
    if trimmed.is_empty() {
        return Err(err());
    }

    let (digits, multiplier) = match trimmed.char_indices().last() {
        Some((idx, suffix)) if suffix.is_ascii_alphabetic() => {
            let factor: u64 = match suffix.to_ascii_uppercase() {
                'K' => 1 << 10,
                'M' => 1 << 20,
                'G' => 1 << 30,
                'T' => 1 << 40,
                _ => return Err(err()),
            };
            (&trimmed[..idx], factor)
        }
        _ => (trimmed, 1),
    };

    let value: u64 = digits.trim().parse().map_err(|_| err())?;
    value.checked_mul(multiplier).ok_or_else(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_parse_with_and_without_suffix() {
        assert_eq!(100, parse_size("100").expect("plain"));
        assert_eq!(1024, parse_size("1K").expect("kilo"));
        assert_eq!(16 * (1 << 30), parse_size("16G").expect("giga"));
        assert_eq!(2 * (1 << 40), parse_size("2T").expect("tera"));
        assert_eq!(5 * (1 << 20), parse_size("5m").expect("lowercase"));
    }

    #[test]
    fn bad_sizes_are_rejected() {
        for input in ["", "G", "12X", "twelve", "1.5G"] {
            assert!(parse_size(input).is_err(), "{input:?} must fail");
        }
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = SluiceConfig::load(Path::new("/definitely/not/here.toml")).expect("load");
        assert_eq!(DEFAULT_CDN, config.cdn_server);
        assert!(config.wasabi.is_none());
        assert_eq!(10, config.sweeper.interval_minutes);
    }

    #[test]
    fn full_file_roundtrip() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("sluice.toml");
        std::fs::write(
            &path,
            r#"
cdn_server = "https://cdn.example.com/streams"
enabled_channels = ["@chan#1"]

[local]
max_size = "100G"

[wasabi]
key = "AK"
secret = "SK"
bucket = "videos"
max_size = "1T"

[sweeper]
interval_minutes = 5
lower_bound = 3
top_number = 7
"#,
        )
        .expect("write");

        let config = SluiceConfig::load(&path).expect("load");
        assert_eq!("https://cdn.example.com/streams", config.cdn_server);
        assert_eq!(vec!["@chan#1".to_owned()], config.enabled_channels);
        assert_eq!(100 * (1 << 30), parse_size(&config.local.max_size).expect("size"));
        let wasabi = config.wasabi.expect("wasabi section");
        assert_eq!("videos", wasabi.bucket);
        assert_eq!(default_endpoint(), wasabi.endpoint);
        assert_eq!(Duration::from_secs(300), config.sweeper.interval());
    }
}
