use anyhow::{ensure, Context, Result};
use reqwest::{Client, RequestBuilder, Response};
use vg::basic_models::{GalleryEntry, LeaderboardEntry, RoastRequest, RoastResponse};

/// The gallery's JSON API, authenticated as the service principal.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    server: String,
    secret: String,
}

impl ApiClient {
    pub fn new(server: &str, secret: &str) -> Self {
        Self {
            http: Client::new(),
            server: server.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
        }
    }

    /// Read the secret from `PRINCIPAL_SECRET`, including any `.env` file.
    pub fn from_env(server: &str) -> Result<Self> {
        let secret = dotenvy::var("PRINCIPAL_SECRET")
            .context("PRINCIPAL_SECRET not found in environment")?;
        Ok(Self::new(server, &secret))
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let resp = request.bearer_auth(&self.secret).send().await?;
        let status = resp.status();
        ensure!(
            status.is_success(),
            "Server replied {}: {}",
            status,
            resp.text().await?,
        );
        Ok(resp)
    }

    /// Succeeds only if the server accepts our secret.
    pub async fn auth_check(&self) -> Result<serde_json::Value> {
        let resp = self.send(self.http.get(self.url("/api/auth/check"))).await?;
        Ok(resp.json().await?)
    }

    pub async fn images(&self) -> Result<Vec<GalleryEntry>> {
        let resp = self.send(self.http.get(self.url("/api/images"))).await?;
        Ok(resp.json().await?)
    }

    pub async fn leaderboard(&self, n: usize) -> Result<Vec<LeaderboardEntry>> {
        let resp = self
            .send(
                self.http
                    .get(self.url("/api/leaderboard"))
                    .query(&[("n", n)]),
            )
            .await?;
        Ok(resp.json().await?)
    }

    /// Roasting takes a few model calls, so this can be slow.
    pub async fn roast(&self, file_id: &str, request: &RoastRequest) -> Result<RoastResponse> {
        let path = format!(
            "/api/image/{}/roast",
            url_escape::encode_component(file_id)
        );
        let resp = self
            .send(self.http.post(self.url(&path)).json(request))
            .await?;
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("Authorization")
            .map(|h| h == "Bearer hunter2")
            .unwrap_or(false)
    }

    /// A stand-in for the gallery server on a random local port
    async fn fake_server() -> String {
        let app = Router::new()
            .route(
                "/api/auth/check",
                get(|headers: HeaderMap| async move {
                    if authorized(&headers) {
                        Ok(Json(serde_json::json!({ "ok": true })))
                    } else {
                        Err((StatusCode::UNAUTHORIZED, "Invalid service principal secret"))
                    }
                }),
            )
            .route(
                "/api/image/:file_id/roast",
                post(
                    |Path(file_id): Path<String>, Json(req): Json<RoastRequest>| async move {
                        Json(RoastResponse {
                            file_id,
                            text: "Bold of you to post this.".into(),
                            level: req.level.unwrap_or(1),
                            audio_base64: None,
                        })
                    },
                ),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn secret_is_sent_as_bearer() {
        let server = fake_server().await;
        let good = ApiClient::new(&server, "hunter2");
        assert_eq!(good.auth_check().await.unwrap()["ok"], true);

        let bad = ApiClient::new(&server, "wrong");
        let err = bad.auth_check().await.unwrap_err().to_string();
        assert!(err.contains("401"), "{}", err);
    }

    #[tokio::test]
    async fn roast_escapes_file_ids() {
        let server = fake_server().await;
        let client = ApiClient::new(&server, "hunter2");
        let roast = client
            .roast(
                "abc 123",
                &RoastRequest {
                    level: Some(3),
                    voice: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(roast.file_id, "abc 123");
        assert_eq!(roast.level, 3);
    }
}
