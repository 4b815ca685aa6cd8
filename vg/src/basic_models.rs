use serde::{Deserialize, Serialize};

/// Roast escalation ("heat"). Only ever biases the tone of a prompt.
pub struct Level;

impl Level {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 3;

    /// Clamp a requested escalation level into the supported range.
    pub fn clamp(level: u8) -> u8 {
        level.clamp(Self::MIN, Self::MAX)
    }
}

/// An image living in the drive folder. The drive owns it; we only reference it.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "thumbnailLink", alias = "thumbnail_link", default)]
    pub thumbnail_link: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Comment {
    pub author: String,
    pub text: String,
    pub created_on: String,
}

/// One generated roast. The audio itself is not stored in the database,
/// only whether it was voiced.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct RoastRecord {
    pub text: String,
    pub level: u8,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub voiced: bool,
    pub created_on: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct RoastRequest {
    /// Force a level instead of escalating from the image's history
    #[serde(default)]
    pub level: Option<u8>,
    #[serde(default)]
    pub voice: bool,
}

#[derive(Deserialize, Serialize, Clone)]
pub struct RoastResponse {
    pub file_id: String,
    pub text: String,
    pub level: u8,
    /// WAV bytes, base64 encoded
    pub audio_base64: Option<String>,
}

impl std::fmt::Debug for RoastResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoastResponse")
            .field("file_id", &self.file_id)
            .field("text", &self.text)
            .field("level", &self.level)
            .field("audio", &self.audio_base64.as_ref().map(|a| a.len()))
            .finish()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GalleryEntry {
    pub image: ImageFile,
    pub votes: i64,
    pub roasts: usize,
    pub comments: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub file_id: String,
    pub name: String,
    pub score: i64,
}
