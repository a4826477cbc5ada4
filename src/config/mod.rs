//! Configuration management
//!
//! Sources, later ones winning: built-in defaults, an optional config file
//! (`callme.*`, or the path in `CALLME_CONFIG`), then `CALLME__`-prefixed
//! environment variables such as `CALLME__ENDPOINTS__TOKEN_URL`.

use crate::domain::call::instructions::DEFAULT_INSTRUCTIONS;
use crate::domain::call::profile::UserProfile;
use crate::infrastructure::media::capture::InputSource;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const ENV_PREFIX: &str = "CALLME";
const CONFIG_PATH_VAR: &str = "CALLME_CONFIG";
const DEFAULT_CONFIG_NAME: &str = "callme";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoints: EndpointsConfig,
    pub ring: RingConfig,
    pub media: MediaConfig,
    /// The person being called
    pub profile: UserProfile,
    pub agent: AgentConfig,
    pub webrtc: WebRtcConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub token_url: String,
    pub store_url: String,
    pub signaling_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Empty means the built-in ringback
    pub ringtone_path: String,
    pub duration_ms: u64,
    pub fade_ms: u64,
}

/// Where caller audio comes from and agent audio goes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaBackend {
    /// Host microphones and speakers
    #[default]
    Device,
    /// The WAV files in `inputs`; nothing is played back
    Wav,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub backend: MediaBackend,
    /// Speaker for the ring tone and the agent; empty means the default output
    pub output_device: String,
    pub inputs: Vec<InputSource>,
    /// Delay between enumerations while no input is listed yet
    pub device_retry_ms: u64,
    pub device_retry_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub instructions: String,
    pub voice: String,
    /// Empty disables input transcription
    pub transcription_model: String,
    /// How long `close()` waits for the final transcript
    pub transcript_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    pub ice_servers: Vec<String>,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            token_url: "http://localhost:3000/api/token".to_string(),
            store_url: "http://localhost:3000/api/calls".to_string(),
            signaling_url: "https://api.openai.com/v1/realtime".to_string(),
            model: "gpt-4o-realtime-preview-2024-12-17".to_string(),
        }
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            ringtone_path: "audio/ringtone.wav".to_string(),
            duration_ms: 5000,
            fade_ms: 1000,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            backend: MediaBackend::Device,
            output_device: String::new(),
            inputs: vec![InputSource {
                id: "default".to_string(),
                label: "Default input".to_string(),
                path: PathBuf::from("audio/caller.wav"),
            }],
            device_retry_ms: 500,
            device_retry_attempts: 10,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            voice: "verse".to_string(),
            transcription_model: "whisper-1".to_string(),
            transcript_timeout_ms: 15_000,
        }
    }
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

impl Config {
    /// Load from the default file location and the environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::var(CONFIG_PATH_VAR).ok();
        Self::load_from(path.as_deref().unwrap_or(DEFAULT_CONFIG_NAME))
    }

    /// Load with `path` as the (optional) config file
    pub fn load_from(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("webrtc.ice_servers")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.ring.duration_ms, 5000);
        assert_eq!(config.ring.fade_ms, 1000);
        assert_eq!(config.media.inputs[0].id, "default");
        assert_eq!(config.media.backend, MediaBackend::Device);
        assert!(config.media.output_device.is_empty());
        assert!(config.agent.instructions.contains("show_details_phone"));
        assert!(config.profile.call_target().is_none());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("callme-test-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[ring]
duration_ms = 2000

[media]
backend = "wav"

[profile]
user_id = "user-42"
name = "Dana Scully"
"#
        )
        .unwrap();

        let config = Config::load_from(path.to_str().unwrap()).unwrap();

        assert_eq!(config.ring.duration_ms, 2000);
        // untouched keys keep their defaults
        assert_eq!(config.ring.fade_ms, 1000);
        assert_eq!(config.media.backend, MediaBackend::Wav);
        assert_eq!(config.media.inputs[0].id, "default");
        assert_eq!(config.profile.call_target(), Some("user-42"));
        assert_eq!(config.endpoints.model, "gpt-4o-realtime-preview-2024-12-17");

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let config = Config::load_from("/nonexistent/callme-config").unwrap();
        assert_eq!(config.agent.voice, "verse");
    }
}
