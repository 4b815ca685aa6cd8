use std::convert::Infallible;
use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::{header, uri::PathAndQuery},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Redirect,
    },
    Form,
};
use futures::StreamExt;
use minijinja::context;
use serde::Deserialize;
use strum::IntoEnumIterator;
use tokio_stream::wrappers::ReceiverStream;

use super::{image_path, AppState, TEMPLATES};
use crate::ai::{self, VibePreset};
use crate::database::MAX_COMMENT_CHARS;
use crate::errors::{WebError, WebResult};
use crate::gallery::{self, GalleryFilter};
use crate::session::BrowserSession;

#[derive(Debug, Deserialize)]
pub struct GalleryQuery {
    #[serde(default)]
    filter: Option<String>,
}

/// The masonry grid of every image, optionally filtered
pub async fn index(
    State(state): State<AppState>,
    session: BrowserSession,
    Query(query): Query<GalleryQuery>,
) -> WebResult<impl IntoResponse> {
    let filter = match query.filter.as_deref() {
        None | Some("") => GalleryFilter::All,
        Some(f) => GalleryFilter::from_str(f)
            .map_err(|_| WebError::BadRequest(format!("Unknown filter {:?}", f)))?,
    };
    let files = state.gallery.files().await?;
    let doc = state.db.load().await?;
    let me = state.sessions.snapshot(&session.id);
    let shown = gallery::filter_images(&files, filter, &doc, &me.favorites);
    let filter_name: &'static str = filter.into();
    let page = TEMPLATES.get_template("index.html.jinja")?.render(context! {
        images => gallery::entries(&shown, &doc),
        filter => filter_name,
        session => me,
    })?;
    Ok((session.jar, Html(page)))
}

pub async fn random(State(state): State<AppState>) -> WebResult<Redirect> {
    let files = state.gallery.files().await?;
    let pick = gallery::random_pick(&files).ok_or(WebError::NotFound)?;
    Ok(Redirect::to(&image_path(&pick.id)))
}

/// One image with everything you can do to it
pub async fn image_page(
    State(state): State<AppState>,
    session: BrowserSession,
    Path(file_id): Path<String>,
) -> WebResult<impl IntoResponse> {
    let file = state
        .gallery
        .find(&file_id)
        .await?
        .ok_or(WebError::NotFound)?;
    let me = state.sessions.with(&session.id, |s| {
        s.open_image(&file_id);
        s.clone()
    });
    let mut doc = state.db.load().await?;
    let presets = VibePreset::iter()
        .map(|p| {
            let value: &'static str = p.into();
            context! { value => value, label => p.label() }
        })
        .collect::<Vec<_>>();
    let page = TEMPLATES.get_template("image.html.jinja")?.render(context! {
        file => file,
        path => image_path(&file_id),
        votes => doc.votes_for(&file_id),
        comments => doc.comments.remove(&file_id).unwrap_or_default(),
        roasts => doc.roasts.remove(&file_id).unwrap_or_default(),
        is_favorite => me.is_favorite(&file_id),
        has_audio => me.current_audio.is_some(),
        presets => presets,
        max_comment_chars => MAX_COMMENT_CHARS,
        session => me,
    })?;
    Ok((session.jar, Html(page)))
}

pub async fn raw_image(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> WebResult<impl IntoResponse> {
    state
        .gallery
        .find(&file_id)
        .await?
        .ok_or(WebError::NotFound)?;
    let bytes = state.gallery.image_bytes(&file_id).await?;
    let mime = image::guess_format(&bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream");
    Ok(([(header::CONTENT_TYPE, mime)], bytes.as_ref().clone()))
}

/// The last thing this browser had spoken, if it is still about this image
pub async fn audio(
    State(state): State<AppState>,
    session: BrowserSession,
    Path(file_id): Path<String>,
) -> WebResult<impl IntoResponse> {
    let me = state.sessions.snapshot(&session.id);
    let audio = me
        .current_audio
        .filter(|_| me.current_image_id.as_deref() == Some(file_id.as_str()))
        .ok_or(WebError::NotFound)?;
    Ok((
        session.jar,
        [(header::CONTENT_TYPE, "audio/wav")],
        audio.as_ref().clone(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct VoteForm {
    stars: u8,
}

pub async fn vote(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Form(form): Form<VoteForm>,
) -> WebResult<Redirect> {
    if !(1..=5).contains(&form.stars) {
        return Err(WebError::BadRequest("Votes are 1 to 5 stars".into()));
    }
    state
        .gallery
        .find(&file_id)
        .await?
        .ok_or(WebError::NotFound)?;
    let total = state.db.vote(&file_id, form.stars).await?;
    tracing::info!(file_id = %file_id, total, "Vote recorded");
    Ok(Redirect::to(&image_path(&file_id)))
}

pub async fn favorite(
    State(state): State<AppState>,
    session: BrowserSession,
    Path(file_id): Path<String>,
) -> WebResult<impl IntoResponse> {
    state.sessions.with(&session.id, |s| s.toggle_favorite(&file_id));
    Ok((session.jar, Redirect::to(&image_path(&file_id))))
}

#[derive(Debug, Deserialize)]
pub struct CommentForm {
    #[serde(default)]
    author: String,
    text: String,
}

pub async fn comment(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    Form(form): Form<CommentForm>,
) -> WebResult<Redirect> {
    let text = form.text.trim();
    if text.is_empty() || text.chars().count() > MAX_COMMENT_CHARS {
        return Err(WebError::BadRequest(format!(
            "Comments must be 1 to {} characters",
            MAX_COMMENT_CHARS
        )));
    }
    state
        .gallery
        .find(&file_id)
        .await?
        .ok_or(WebError::NotFound)?;
    state.db.add_comment(&file_id, &form.author, text).await?;
    Ok(Redirect::to(&image_path(&file_id)))
}

#[derive(Debug, Deserialize)]
pub struct RoastForm {
    #[serde(default)]
    level: Option<u8>,
}

pub async fn roast(
    State(state): State<AppState>,
    session: BrowserSession,
    Path(file_id): Path<String>,
    Form(form): Form<RoastForm>,
) -> WebResult<impl IntoResponse> {
    state
        .gallery
        .find(&file_id)
        .await?
        .ok_or(WebError::NotFound)?;
    let voice = state.sessions.with(&session.id, |s| {
        s.open_image(&file_id);
        s.voice_mode
    });
    let roasted = state.roast(&file_id, form.level, voice).await?;
    state.sessions.with(&session.id, |s| {
        s.stats.roasts += 1;
        if let Some(audio) = roasted.audio {
            s.set_audio(audio);
        }
    });
    Ok((session.jar, Redirect::to(&image_path(&file_id))))
}

#[derive(Debug, Deserialize)]
pub struct ChatForm {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    preset: Option<String>,
}

impl ChatForm {
    /// A preset button wins over whatever was typed
    fn resolve(&self) -> WebResult<String> {
        if let Some(preset) = self.preset.as_deref().filter(|p| !p.is_empty()) {
            let preset = VibePreset::from_str(preset)
                .map_err(|_| WebError::BadRequest(format!("Unknown preset {:?}", preset)))?;
            return Ok(preset.prompt().into());
        }
        match self.prompt.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => Ok(p.into()),
            _ => Err(WebError::BadRequest("Say something first".into())),
        }
    }
}

pub async fn chat(
    State(state): State<AppState>,
    session: BrowserSession,
    Path(file_id): Path<String>,
    Form(form): Form<ChatForm>,
) -> WebResult<impl IntoResponse> {
    let prompt = form.resolve()?;
    state
        .gallery
        .find(&file_id)
        .await?
        .ok_or(WebError::NotFound)?;
    let (history, roast_mode, voice_mode) = state.sessions.with(&session.id, |s| {
        s.open_image(&file_id);
        (s.chat_history.clone(), s.roast_mode, s.voice_mode)
    });
    let reply = normalize_newlines(&state.chat(&file_id, &prompt, &history, roast_mode).await?);
    let audio = if voice_mode {
        state
            .speech
            .speak(&reply, roast_mode)
            .await
            .map_err(|e| tracing::warn!("Could not voice reply: {:#}", e))
            .ok()
    } else {
        None
    };
    state.sessions.with(&session.id, |s| {
        s.record_chat(&prompt, &reply);
        if let Some(audio) = audio {
            s.set_audio(audio);
        }
    });
    Ok((session.jar, Redirect::to(&image_path(&file_id))))
}

/// SSE fields may not contain `\r`, and models do send CRLF.
pub(crate) fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

pub(crate) fn sse_event(name: &str, data: &str) -> Event {
    Event::default().event(name).data(normalize_newlines(data))
}

/// The same chat, streamed to the page as server-sent events.
///
/// Each delta is a `delta` event; a final `done` event follows once the reply
/// (and its audio, in voice mode) has been saved to the session.
pub async fn chat_stream(
    State(state): State<AppState>,
    session: BrowserSession,
    Path(file_id): Path<String>,
    Query(form): Query<ChatForm>,
) -> WebResult<impl IntoResponse> {
    let prompt = form.resolve()?;
    state
        .gallery
        .find(&file_id)
        .await?
        .ok_or(WebError::NotFound)?;
    let (history, roast_mode, voice_mode) = state.sessions.with(&session.id, |s| {
        s.open_image(&file_id);
        (s.chat_history.clone(), s.roast_mode, s.voice_mode)
    });
    let image = state.gallery.image_bytes(&file_id).await?;
    let mut deltas = ai::chat_stream(&state.llm, &image, &prompt, &history, roast_mode).await?;

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, Infallible>>(32);
    let session_id = session.id;
    tokio::spawn(async move {
        let mut reply = String::new();
        while let Some(delta) = deltas.next().await {
            match delta {
                Ok(delta) => {
                    let delta = normalize_newlines(&delta);
                    reply.push_str(&delta);
                    if tx
                        .send(Ok(sse_event("delta", &delta)))
                        .await
                        .is_err()
                    {
                        tracing::debug!("Chat stream closed by the browser");
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!("Chat stream failed: {:#}", e);
                    let _ = tx
                        .send(Ok(sse_event("error", &e.to_string())))
                        .await;
                    return;
                }
            }
        }
        let audio = if voice_mode {
            state
                .speech
                .speak(&reply, roast_mode)
                .await
                .map_err(|e| tracing::warn!("Could not voice reply: {:#}", e))
                .ok()
        } else {
            None
        };
        let has_audio = audio.is_some();
        state.sessions.with(&session_id, |s| {
            s.record_chat(&prompt, &reply);
            if let Some(audio) = audio {
                s.set_audio(audio);
            }
        });
        let _ = tx
            .send(Ok(sse_event("done", if has_audio { "audio" } else { "" })))
            .await;
    });

    Ok((
        session.jar,
        Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()),
    ))
}

#[derive(Debug, Deserialize)]
pub struct TogglesForm {
    // Checkboxes are only sent when ticked
    #[serde(default)]
    roast_mode: Option<String>,
    #[serde(default)]
    voice_mode: Option<String>,
    #[serde(default)]
    back: Option<String>,
}

pub async fn toggles(
    State(state): State<AppState>,
    session: BrowserSession,
    Form(form): Form<TogglesForm>,
) -> WebResult<impl IntoResponse> {
    state.sessions.with(&session.id, |s| {
        s.roast_mode = form.roast_mode.is_some();
        s.voice_mode = form.voice_mode.is_some();
    });
    Ok((session.jar, Redirect::to(&local_redirect(form.back.as_deref()))))
}

/// Only ever bounce back to a path on this site. Anything else goes home.
pub(crate) fn local_redirect(back: Option<&str>) -> String {
    back.filter(|b| {
        b.starts_with('/')
            && !b.starts_with("//")
            // browsers read `/\host` as `//host`
            && !b.contains('\\')
            && b.bytes().all(|c| c.is_ascii_graphic())
    })
    .and_then(|b| b.parse::<PathAndQuery>().ok())
    .map(|pq| pq.as_str().to_string())
    .unwrap_or_else(|| "/".into())
}

/// Hall of flame: best scoring images and some counters
pub async fn leaderboard(
    State(state): State<AppState>,
    session: BrowserSession,
) -> WebResult<impl IntoResponse> {
    let files = state.gallery.files().await?;
    let doc = state.db.load().await?;
    let me = state.sessions.snapshot(&session.id);
    let page = TEMPLATES
        .get_template("leaderboard.html.jinja")?
        .render(context! {
            top => gallery::leaderboard(&files, &doc, 5),
            stats => doc.stats,
            total_votes => doc.votes.values().sum::<i64>(),
            total_comments => doc.comments.values().map(Vec::len).sum::<usize>(),
            session => me,
        })?;
    Ok((session.jar, Html(page)))
}
