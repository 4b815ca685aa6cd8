use anyhow::Result;
use vg::basic_models::RoastRecord;

use crate::ai::{self, describe_image, generate_roast, roast_level_for};
use crate::database::current_timestamp;
use crate::web::AppState;

/// A finished roast, with its audio if it was voiced
pub struct Roasted {
    pub record: RoastRecord,
    pub audio: Option<Vec<u8>>,
}

impl AppState {
    /// Look at the picture, write the roast, optionally voice it, and remember it.
    ///
    /// Earlier roasts of the same image set the heat and are passed along so the
    /// jokes escalate. A failed speech request downgrades to a text-only roast.
    pub async fn roast(&self, file_id: &str, level: Option<u8>, voice: bool) -> Result<Roasted> {
        let image = self.gallery.image_bytes(file_id).await?;
        let history = self.db.roast_history(file_id).await?;
        let level = roast_level_for(&history, level);

        let description = describe_image(&self.llm, &image).await?;
        let text = generate_roast(&self.llm, &description, level, &history).await?;

        let audio = if voice {
            self.speech
                .speak(&text, true)
                .await
                .map_err(|e| tracing::warn!("Could not voice roast of {}: {:#}", file_id, e))
                .ok()
        } else {
            None
        };

        let record = RoastRecord {
            text,
            level,
            description: Some(description),
            voiced: audio.is_some(),
            created_on: current_timestamp(),
        };
        self.db.append_roast(file_id, record.clone()).await?;
        tracing::info!(file_id, level, voiced = record.voiced, "Roasted image");
        Ok(Roasted { record, audio })
    }

    /// Free-form chat about an image, returning the whole reply.
    pub async fn chat(
        &self,
        file_id: &str,
        prompt: &str,
        history: &[ai::ChatMessage],
        roast_mode: bool,
    ) -> Result<String> {
        let image = self.gallery.image_bytes(file_id).await?;
        let stream = ai::chat_stream(&self.llm, &image, prompt, history, roast_mode).await?;
        ai::chat::collect_reply(stream).await
    }
}
