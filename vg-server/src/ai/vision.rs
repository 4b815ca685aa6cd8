use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use async_openai::types::{
    ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, ImageDetail,
    ImageUrlArgs,
};
use base64::Engine;
use image::{imageops::FilterType, DynamicImage, ImageFormat};

use super::LlmClient;

/// Longest edge sent to the vision model. Larger photos only cost tokens.
pub const MAX_EDGE: u32 = 1024;

/// Convert jpeg bytes to a data URL
fn to_data_url(bytes: &[u8]) -> String {
    format!(
        "data:image/jpeg;base64,{}",
        // For the purpose of data urls, you do NOT need to use the URL_SAFE variant
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Decode whatever the drive gave us, shrink it, and re-encode it as a JPEG data URL.
pub fn prepare_image(image_bytes: &[u8]) -> Result<String> {
    let mut img = image::load_from_memory(image_bytes).context("Decoding image")?;
    if img.width() > MAX_EDGE || img.height() > MAX_EDGE {
        img = img.resize(MAX_EDGE, MAX_EDGE, FilterType::Lanczos3);
    }
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut jpeg = vec![];
    rgb.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)?;
    Ok(to_data_url(&jpeg))
}

/// A user turn carrying both a text prompt and the picture
pub(crate) fn image_message(
    prompt: &str,
    data_url: String,
) -> Result<ChatCompletionRequestUserMessage> {
    Ok(ChatCompletionRequestUserMessageArgs::default()
        .content(vec![
            ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(prompt)
                .build()?
                .into(),
            ChatCompletionRequestMessageContentPartImageArgs::default()
                .image_url(
                    ImageUrlArgs::default()
                        .url(data_url)
                        .detail(ImageDetail::Auto)
                        .build()?,
                )
                .build()?
                .into(),
        ])
        .build()?)
}

/// First stage of the roast pipeline: get a plain description of what is in the photo.
pub async fn describe_image(llm: &LlmClient, image_bytes: &[u8]) -> Result<String> {
    let data_url = prepare_image(image_bytes)?;
    let prompt = include_str!("../../prompts/describe-image.md");
    let request = CreateChatCompletionRequestArgs::default()
        .model(&llm.config.vision_model)
        .messages([image_message(prompt, data_url)?.into()])
        .temperature(0.2_f32)
        .max_tokens(llm.config.max_tokens)
        .build()?;
    tracing::info!("Describing image with {}", llm.config.vision_model);
    let description = llm
        .client
        .chat()
        .create(request)
        .await?
        .choices
        .first_mut()
        .and_then(|c| c.message.content.take())
        .ok_or(anyhow!("No message content when describing image."))?;
    tracing::debug!("Description: {}", description);
    Ok(description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbaImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(width, height));
        let mut bytes = vec![];
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn decode_data_url(url: &str) -> DynamicImage {
        let b64 = url.strip_prefix("data:image/jpeg;base64,").unwrap();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .unwrap();
        image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg).unwrap()
    }

    #[test]
    fn large_images_are_shrunk_keeping_aspect() {
        let img = decode_data_url(&prepare_image(&png(2048, 1024)).unwrap());
        assert_eq!(img.dimensions(), (1024, 512));
    }

    #[test]
    fn small_images_keep_their_size() {
        let img = decode_data_url(&prepare_image(&png(64, 48)).unwrap());
        assert_eq!(img.dimensions(), (64, 48));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(prepare_image(b"definitely not a picture").is_err());
    }
}
