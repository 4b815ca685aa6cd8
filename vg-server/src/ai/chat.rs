use anyhow::Result;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};

use super::{vision, ChatMessage, ChatRole, LlmClient};

fn persona(roast_mode: bool) -> &'static str {
    if roast_mode {
        include_str!("../../prompts/savage-persona.md")
    } else {
        include_str!("../../prompts/friendly-persona.md")
    }
}

/// The earlier transcript goes in as plain text; only the newest turn carries the image.
pub(crate) fn chat_request(
    llm: &LlmClient,
    data_url: String,
    prompt: &str,
    history: &[ChatMessage],
    roast_mode: bool,
) -> Result<CreateChatCompletionRequest> {
    let mut messages: Vec<ChatCompletionRequestMessage> =
        vec![ChatCompletionRequestSystemMessageArgs::default()
            .content(persona(roast_mode))
            .build()?
            .into()];
    for turn in history {
        messages.push(match turn.role {
            ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
                .content(turn.content.clone())
                .build()?
                .into(),
            ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(turn.content.clone())
                .build()?
                .into(),
        });
    }
    messages.push(vision::image_message(prompt, data_url)?.into());
    Ok(CreateChatCompletionRequestArgs::default()
        .model(&llm.config.chat_model)
        .messages(messages)
        .temperature(if roast_mode { 0.8_f32 } else { 0.6_f32 })
        .max_tokens(llm.config.max_tokens)
        .build()?)
}

/// Chat about an image, streaming the reply as it is generated.
///
/// `history` is the transcript before `prompt`; the caller records both turns afterwards.
pub async fn chat_stream(
    llm: &LlmClient,
    image_bytes: &[u8],
    prompt: &str,
    history: &[ChatMessage],
    roast_mode: bool,
) -> Result<BoxStream<'static, Result<String>>> {
    let data_url = vision::prepare_image(image_bytes)?;
    let request = chat_request(llm, data_url, prompt, history, roast_mode)?;
    tracing::info!(
        "Starting chat with {} (roast mode: {})",
        llm.config.chat_model,
        roast_mode
    );
    let stream = llm.client.chat().create_stream(request).await?;
    Ok(stream
        .map_err(anyhow::Error::from)
        .try_filter_map(|response| async move {
            Ok(response
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content)
                .filter(|delta| !delta.is_empty()))
        })
        .boxed())
}

/// Drain a reply stream into the full text.
pub async fn collect_reply(mut stream: BoxStream<'static, Result<String>>) -> Result<String> {
    let mut reply = String::new();
    while let Some(delta) = stream.next().await {
        reply.push_str(&delta?);
    }
    Ok(reply)
}
