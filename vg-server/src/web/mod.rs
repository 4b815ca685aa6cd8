use std::sync::Arc;

use axum::{
    extract::{FromRef, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};

use crate::ai::LlmClient;
use crate::auth::PrincipalSecret;
use crate::database::Database;
use crate::errors::{WebError, WebResult};
use crate::gallery::Gallery;
use crate::session::Sessions;
use crate::tts::SpeechClient;

pub mod api;
pub mod pages;

/// Render roast and chat text, which usually comes back as markdown.
/// markdown-rs escapes raw HTML, so the output is safe to mark as such.
fn markdown_filter(text: String) -> minijinja::Value {
    minijinja::Value::from_safe_string(markdown::to_html(&text))
}

fn urlpart(text: String) -> String {
    url_escape::encode_component(&text).into_owned()
}

lazy_static::lazy_static! {
    pub(crate) static ref TEMPLATES: minijinja::Environment<'static> = {
        let mut env = minijinja::Environment::new();
        for (name, template) in &[
            ("base.html.jinja", include_str!("../../templates/base.html.jinja")),
            ("index.html.jinja", include_str!("../../templates/index.html.jinja")),
            ("image.html.jinja", include_str!("../../templates/image.html.jinja")),
            ("leaderboard.html.jinja", include_str!("../../templates/leaderboard.html.jinja")),
        ] {
            env.add_template(name, template)
                .expect("Failed to register template");
        }
        env.add_filter("markdown", markdown_filter);
        env.add_filter("urlpart", urlpart);
        env
    };
}

/// Where a page or API call lands for a given image
pub(crate) fn image_path(file_id: &str) -> String {
    format!("/image/{}", urlpart(file_id.into()))
}

#[derive(Clone)]
pub struct AppState {
    pub gallery: Gallery,
    pub db: Database,
    pub llm: LlmClient,
    pub speech: SpeechClient,
    pub sessions: Arc<Sessions>,
    pub principal: PrincipalSecret,
}

impl FromRef<AppState> for Arc<Sessions> {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}

impl FromRef<AppState> for PrincipalSecret {
    fn from_ref(state: &AppState) -> Self {
        state.principal.clone()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // `GET /` goes to `index`
        .route("/", get(pages::index))
        .route("/random", get(pages::random))
        .route("/leaderboard", get(pages::leaderboard))
        .route("/health", get(health))
        .route("/image/:file_id", get(pages::image_page))
        .route("/image/:file_id/raw", get(pages::raw_image))
        .route("/image/:file_id/audio", get(pages::audio))
        .route("/image/:file_id/vote", post(pages::vote))
        .route("/image/:file_id/favorite", post(pages::favorite))
        .route("/image/:file_id/comment", post(pages::comment))
        .route("/image/:file_id/roast", post(pages::roast))
        .route("/image/:file_id/chat", post(pages::chat))
        .route("/image/:file_id/chat/stream", get(pages::chat_stream))
        .route("/session/toggles", post(pages::toggles))
        // JSON API for machine clients, behind the service principal
        .route("/api/auth/check", get(api::auth_check))
        .route("/api/images", get(api::images))
        .route("/api/leaderboard", get(api::leaderboard))
        .route("/api/image/:file_id/roast", post(api::roast))
        // serve static files from the `./static` directory
        .route("/static/*path", get(serve_static))
        .layer(
            tower_http::compression::CompressionLayer::new()
                .quality(tower_http::CompressionLevel::Fastest),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

// Just reply that everything is okay
async fn health() -> StatusCode {
    StatusCode::OK
}

/// Serve static files from in memory using `include_dir!`
async fn serve_static(Path(path): Path<String>) -> WebResult<impl IntoResponse> {
    let dir = include_dir::include_dir!("$CARGO_MANIFEST_DIR/static");
    let bytes = dir.get_file(&path).ok_or(WebError::NotFound)?.contents();
    let header = (
        "Content-Type",
        match path.split('.').last() {
            Some("css") => "text/css",
            Some("js") => "text/javascript",
            Some("svg") => "image/svg+xml",
            _ => "application/octet-stream",
        },
    );
    Ok(([header], bytes).into_response())
}
