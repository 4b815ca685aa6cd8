use async_openai::{config::OpenAIConfig, Client};
use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString, IntoStaticStr};

use crate::config::AiConfig;

pub mod chat;
pub mod roast;
pub mod vision;

pub use chat::chat_stream;
pub use roast::{generate_roast, roast_level_for};
pub use vision::describe_image;

/// An OpenAI-compatible chat completion API, along with the models to use for each task.
#[derive(Clone)]
pub struct LlmClient {
    pub(crate) client: Client<OpenAIConfig>,
    pub(crate) config: AiConfig,
}

impl LlmClient {
    pub fn new(config: &AiConfig, api_key: &str) -> Self {
        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base(&config.api_base),
        );
        Self {
            client,
            config: config.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One turn of the per-session chat about an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Canned prompts offered as buttons next to the chat box
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum VibePreset {
    Roast,
    Meme,
    Detective,
    Future,
    Song,
    Pickle,
}

impl VibePreset {
    pub fn label(&self) -> &'static str {
        match self {
            VibePreset::Roast => "Roast",
            VibePreset::Meme => "Meme",
            VibePreset::Detective => "Detective",
            VibePreset::Future => "Future",
            VibePreset::Song => "Song",
            VibePreset::Pickle => "Pickle",
        }
    }

    pub fn prompt(&self) -> &'static str {
        match self {
            VibePreset::Roast => {
                "Roast this image like a savage comedian. Be mean, funny, and critical."
            }
            VibePreset::Meme => "Create a viral meme caption for this. Short and punchy.",
            VibePreset::Detective => {
                "Analyze the background details to deduce where this photo was taken."
            }
            VibePreset::Future => "Predict the future of the person or object in this photo.",
            VibePreset::Song => "What song matches this vibe? Give me artist and title.",
            VibePreset::Pickle => "Describe this image but relate everything to pickles.",
        }
    }
}
