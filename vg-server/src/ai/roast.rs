use anyhow::{anyhow, Result};
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use vg::basic_models::{Level, RoastRecord};

use super::LlmClient;

/// Pick the heat for the next roast of an image.
///
/// An explicit request wins. Otherwise every roast of the same image turns it up one notch.
pub fn roast_level_for(history: &[RoastRecord], requested: Option<u8>) -> u8 {
    match requested {
        Some(level) => Level::clamp(level),
        None => Level::clamp(u8::try_from(history.len() + 1).unwrap_or(Level::MAX)),
    }
}

fn tone_for(level: u8) -> &'static str {
    match Level::clamp(level) {
        1 => "Keep it playful, a friendly ribbing between mates.",
        2 => "Be savage. Go for the obvious weak spots.",
        _ => "No mercy. This is the final round; make it brutal and personal about the photo.",
    }
}

fn roast_prompt(description: &str, level: u8) -> String {
    include_str!("../../prompts/roast.md")
        .replace("{description}", description)
        .replace("{level}", &Level::clamp(level).to_string())
        .replace("{tone}", tone_for(level))
}

/// Build the conversation for a roast: the persona, the earlier roasts as things we
/// already said, and then the new request.
pub(crate) fn roast_messages(
    description: &str,
    level: u8,
    history: &[RoastRecord],
) -> Result<Vec<ChatCompletionRequestMessage>> {
    let mut messages: Vec<ChatCompletionRequestMessage> =
        vec![ChatCompletionRequestSystemMessageArgs::default()
            .content(include_str!("../../prompts/roast-persona.md"))
            .build()?
            .into()];
    for earlier in history {
        let context = earlier.description.as_deref().unwrap_or(description);
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(roast_prompt(context, earlier.level))
                .build()?
                .into(),
        );
        messages.push(
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(earlier.text.clone())
                .build()?
                .into(),
        );
    }
    messages.push(
        ChatCompletionRequestUserMessageArgs::default()
            .content(roast_prompt(description, level))
            .build()?
            .into(),
    );
    Ok(messages)
}

/// Second stage of the roast pipeline: turn a description into comedy.
pub async fn generate_roast(
    llm: &LlmClient,
    description: &str,
    level: u8,
    history: &[RoastRecord],
) -> Result<String> {
    tracing::info!("Generating level {} roast ..", level);
    let request = CreateChatCompletionRequestArgs::default()
        .model(&llm.config.text_model)
        .messages(roast_messages(description, level, history)?)
        .temperature(0.7_f32 + 0.1 * f32::from(Level::clamp(level)))
        .max_tokens(llm.config.max_tokens)
        .build()?;
    let text = llm
        .client
        .chat()
        .create(request)
        .await?
        .choices
        .first()
        .ok_or(anyhow!("No response from LLM"))?
        .clone()
        .message
        .content
        .ok_or(anyhow!("No response from LLM"))?;
    Ok(text.trim().to_string())
}
