use std::sync::Arc;

use axum::extract::FromRef;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};
use crypto_bigint::{Encoding, Random, U256};
use dashmap::DashMap;
use serde::Serialize;

use crate::ai::ChatMessage;

pub type SessionID = U256;

const COOKIE_NAME: &str = "session_id";

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct SessionStats {
    pub roasts: u64,
    pub voice_generations: u64,
}

/// What one browser is doing right now. Lives only in memory.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SessionState {
    pub current_image_id: Option<String>,
    pub chat_history: Vec<ChatMessage>,
    pub roast_mode: bool,
    pub voice_mode: bool,
    pub favorites: Vec<String>,
    pub stats: SessionStats,
    #[serde(skip)]
    pub current_audio: Option<Arc<Vec<u8>>>,
    #[serde(skip)]
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

impl SessionState {
    /// Focus an image. Switching to a different image forgets the chat and audio.
    pub fn open_image(&mut self, file_id: &str) {
        if self.current_image_id.as_deref() != Some(file_id) {
            self.current_image_id = Some(file_id.into());
            self.chat_history.clear();
            self.current_audio = None;
        }
    }

    /// Returns whether the image is a favourite afterwards.
    pub fn toggle_favorite(&mut self, file_id: &str) -> bool {
        if let Some(pos) = self.favorites.iter().position(|f| f == file_id) {
            self.favorites.remove(pos);
            false
        } else {
            self.favorites.push(file_id.into());
            true
        }
    }

    pub fn is_favorite(&self, file_id: &str) -> bool {
        self.favorites.iter().any(|f| f == file_id)
    }

    /// Record a finished exchange about the open image.
    pub fn record_chat(&mut self, prompt: &str, reply: &str) {
        self.stats.roasts += 1;
        self.chat_history.push(ChatMessage::user(prompt));
        self.chat_history.push(ChatMessage::assistant(reply));
    }

    pub fn set_audio(&mut self, audio: Vec<u8>) {
        self.stats.voice_generations += 1;
        self.current_audio = Some(Arc::new(audio));
    }
}

/// All live browser sessions. Nothing here is ever written to disk.
pub struct Sessions {
    pub sessions: DashMap<SessionID, SessionState>,
    idle: chrono::Duration,
    secure_cookies: bool,
}

impl Sessions {
    pub fn new(idle_minutes: i64, secure_cookies: bool) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            idle: chrono::Duration::minutes(idle_minutes),
            secure_cookies,
        })
    }

    /// Start a task that forgets idle sessions every 5 minutes
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let sessions = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(300)).await;
                let evicted = sessions.evict_idle(chrono::Utc::now());
                if evicted > 0 {
                    tracing::info!("Evicted {} idle sessions", evicted);
                }
            }
        });
    }

    pub fn evict_idle(&self, now: chrono::DateTime<chrono::Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| now - s.last_seen <= self.idle);
        before - self.sessions.len()
    }

    pub fn create(&self) -> SessionID {
        let id = SessionID::random(&mut rand::thread_rng());
        self.sessions.insert(
            id,
            SessionState {
                last_seen: chrono::Utc::now(),
                ..Default::default()
            },
        );
        id
    }

    /// Run `f` against a session, recreating it if it was evicted in the meantime.
    pub fn with<T>(&self, id: &SessionID, f: impl FnOnce(&mut SessionState) -> T) -> T {
        let mut entry = self.sessions.entry(*id).or_default();
        entry.last_seen = chrono::Utc::now();
        f(entry.value_mut())
    }

    pub fn snapshot(&self, id: &SessionID) -> SessionState {
        self.with(id, |s| s.clone())
    }

    fn cookie(&self, id: &SessionID) -> Cookie<'static> {
        Cookie::build((COOKIE_NAME, hex::encode(id.to_be_bytes())))
            .http_only(true)
            .path("/")
            .same_site(SameSite::Lax)
            .secure(self.secure_cookies)
            .build()
    }
}

fn parse_session_id(value: &str) -> Option<SessionID> {
    let bytes = hex::decode(value).ok()?;
    (bytes.len() == U256::BYTES).then(|| U256::from_be_slice(&bytes))
}

/// The caller's session. Handlers must return `jar` so a new cookie reaches the browser.
pub struct BrowserSession {
    pub id: SessionID,
    pub jar: CookieJar,
}

#[async_trait]
impl<S> FromRequestParts<S> for BrowserSession
where
    Arc<Sessions>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_request_parts(parts, state).await?;
        let sessions = Arc::<Sessions>::from_ref(state);
        let known = jar
            .get(COOKIE_NAME)
            .and_then(|c| parse_session_id(c.value()))
            .filter(|id| sessions.sessions.contains_key(id));
        Ok(match known {
            Some(id) => BrowserSession { id, jar },
            None => {
                let id = sessions.create();
                tracing::debug!("Started a new browser session");
                BrowserSession {
                    id,
                    jar: jar.add(sessions.cookie(&id)),
                }
            }
        })
    }
}
