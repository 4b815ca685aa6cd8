use serde::Deserialize;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub drive: DriveConfig,
    pub ai: AiConfig,
    pub tts: TtsConfig,
    pub session: SessionConfig,
}

impl Config {
    /// Load the configuration from a YAML file.
    pub fn load(yml_path: &str) -> anyhow::Result<Self> {
        let yml = std::fs::read_to_string(yml_path)?;
        Self::from_yaml(&yml)
    }

    pub fn from_yaml(yml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yml)?;
        Ok(config)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub tls: Option<TLSConfig>,
    /// Directory for the rolling access log
    pub log_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:3000".into(),
            tls: None,
            log_dir: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TLSConfig {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Root of the Drive REST API. The files and upload endpoints hang off it.
    pub api_base: String,
    /// The drive folder holding the images and the database file
    pub folder_id: String,
    /// Service account key JSON, as downloaded from the cloud console
    pub credentials_path: String,
    /// Name of the JSON file used as the database
    pub database_name: String,
    /// Serve a local directory instead of the drive folder
    pub local_dir: Option<String>,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base: "https://www.googleapis.com".into(),
            folder_id: String::new(),
            credentials_path: "service-account.json".into(),
            database_name: "vibe-gallery-db.json".into(),
            local_dir: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub api_base: String,
    pub vision_model: String,
    pub text_model: String,
    pub chat_model: String,
    pub max_tokens: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.groq.com/openai/v1".into(),
            vision_model: "meta-llama/llama-4-scout-17b-16e-instruct".into(),
            text_model: "llama-3.3-70b-versatile".into(),
            chat_model: "meta-llama/llama-4-scout-17b-16e-instruct".into(),
            max_tokens: 800,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub api_base: String,
    pub model: String,
    pub roast_voice: String,
    pub friendly_voice: String,
    /// Longest piece of text sent in one speech request
    pub segment_chars: usize,
    /// Silence inserted between spoken segments
    pub gap_ms: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".into(),
            model: "tts-1".into(),
            roast_voice: "onyx".into(),
            friendly_voice: "nova".into(),
            segment_chars: 400,
            gap_ms: 350,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub idle_minutes: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { idle_minutes: 120 }
    }
}
