use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_retry::Retry;
use vg::basic_models::ImageFile;

use super::{check_version, BlobStore, ImageSource, StoreResult, VersionedBlob};
use crate::config::DriveConfig;

const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// Three attempts in all, about 100 ms and then 1 s apart
fn default_retry() -> impl Iterator<Item = std::time::Duration> {
    tokio_retry::strategy::ExponentialBackoff::from_millis(10)
        .factor(10)
        .map(tokio_retry::strategy::jitter)
        .take(2)
}

/// The parts of a service account key file we need
#[derive(Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".into()
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct AccessToken {
    token: String,
    expires: chrono::DateTime<chrono::Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<ImageFile>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct FileMeta {
    id: String,
    version: String,
}

#[derive(Deserialize)]
struct FileMetaList {
    #[serde(default)]
    files: Vec<FileMeta>,
}

/// Google Drive v3, authenticated as a service account.
///
/// The folder doubles as the image source and as the home of the JSON database file.
#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    files_endpoint: String,
    upload_endpoint: String,
    folder_id: String,
    key: ServiceAccountKey,
    token: Arc<RwLock<Option<AccessToken>>>,
}

/// The cached token, unless it expires within the next minute
fn unexpired(token: &Option<AccessToken>) -> Option<String> {
    token
        .as_ref()
        .filter(|t| t.expires > chrono::Utc::now() + chrono::Duration::minutes(1))
        .map(|t| t.token.clone())
}

/// Metadata and content in one `multipart/related` body. Returns the content type and the body.
fn multipart_body(metadata: &serde_json::Value, content: &[u8]) -> (String, Vec<u8>) {
    let boundary = format!("vibe-gallery-{:016x}", rand::random::<u64>());
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
             --{boundary}\r\nContent-Type: application/json\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/related; boundary={boundary}"), body)
}

impl DriveClient {
    /// `key_json` is the service account key file's content.
    pub fn new(api_base: &str, folder_id: &str, key_json: &str) -> Result<Self> {
        let key = serde_json::from_str(key_json).context("Parsing service account key")?;
        anyhow::ensure!(!folder_id.is_empty(), "drive.folder_id is not set");
        let api_base = api_base.trim_end_matches('/');
        Ok(Self {
            http: Client::new(),
            files_endpoint: format!("{}/drive/v3/files", api_base),
            upload_endpoint: format!("{}/upload/drive/v3/files", api_base),
            folder_id: folder_id.into(),
            key,
            token: Default::default(),
        })
    }

    pub fn from_config(conf: &DriveConfig) -> Result<Self> {
        let key_text = std::fs::read_to_string(&conf.credentials_path)
            .with_context(|| format!("Reading service account key {}", conf.credentials_path))?;
        Self::new(&conf.api_base, &conf.folder_id, &key_text)
    }

    /// Get a bearer token, refreshing it when it is about to expire.
    async fn access_token(&self) -> Result<String> {
        if let Some(token) = unexpired(&*self.token.read().await) {
            return Ok(token);
        }
        let mut token = self.token.write().await;
        // Another request may have refreshed it while we waited for the lock
        if let Some(fresh) = unexpired(&token) {
            return Ok(fresh);
        }
        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: DRIVE_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let assertion = jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())?,
        )?;
        let response: TokenResponse = self
            .http
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?
            .error_for_status()
            .context("Exchanging service account assertion")?
            .json()
            .await?;
        tracing::info!("Refreshed drive access token");
        let access = response.access_token.clone();
        *token = Some(AccessToken {
            token: response.access_token,
            expires: chrono::Utc::now() + chrono::Duration::seconds(response.expires_in),
        });
        Ok(access)
    }

    /// Find a file in the folder by its exact name.
    async fn find_by_name(&self, name: &str) -> Result<Option<FileMeta>> {
        let query = format!(
            "name = '{}' and '{}' in parents and trashed = false",
            name.replace('\\', "\\\\").replace('\'', "\\'"),
            self.folder_id
        );
        let list: FileMetaList = self
            .http
            .get(&self.files_endpoint)
            .bearer_auth(self.access_token().await?)
            .query(&[("q", query.as_str()), ("fields", "files(id, version)")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(list.files.into_iter().next())
    }

    /// Create a file in the folder with its first content in a single multipart upload.
    async fn create(&self, name: &str, bytes: &[u8]) -> Result<FileMeta> {
        let metadata = serde_json::json!({
            "name": name,
            "parents": [self.folder_id],
            "mimeType": "application/json",
        });
        let (content_type, body) = multipart_body(&metadata, bytes);
        let created = self
            .http
            .post(&self.upload_endpoint)
            .bearer_auth(self.access_token().await?)
            .query(&[("uploadType", "multipart"), ("fields", "id, version")])
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("Creating {}", name))?
            .json()
            .await?;
        Ok(created)
    }

    /// Replace the content of an existing file.
    async fn update(&self, name: &str, file_id: &str, bytes: Vec<u8>) -> Result<FileMeta> {
        let updated = self
            .http
            .patch(format!("{}/{}", self.upload_endpoint, file_id))
            .bearer_auth(self.access_token().await?)
            .query(&[("uploadType", "media"), ("fields", "id, version")])
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(bytes)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| anyhow!("Uploading {}: {}", name, e))?
            .json()
            .await?;
        Ok(updated)
    }
}

#[async_trait]
impl ImageSource for DriveClient {
    async fn list_images(&self) -> Result<Vec<ImageFile>> {
        let query = format!(
            "'{}' in parents and mimeType contains 'image/' and trashed = false",
            self.folder_id
        );
        let mut files = vec![];
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .http
                .get(&self.files_endpoint)
                .bearer_auth(self.access_token().await?)
                .query(&[
                    ("q", query.as_str()),
                    ("pageSize", "100"),
                    ("fields", "nextPageToken, files(id, name, thumbnailLink)"),
                ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let page: FileList = request.send().await?.error_for_status()?.json().await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        tracing::info!("Listed {} images in drive folder", files.len());
        Ok(files)
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{}", self.files_endpoint, file_id);
        let bytes = Retry::spawn(default_retry(), || async {
            let bytes = self
                .http
                .get(&url)
                .bearer_auth(self.access_token().await?)
                .query(&[("alt", "media")])
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?;
            anyhow::Ok(bytes)
        })
        .await
        .with_context(|| format!("Downloading {}", file_id))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl BlobStore for DriveClient {
    async fn read(&self, name: &str) -> StoreResult<Option<VersionedBlob>> {
        let Some(meta) = self.find_by_name(name).await? else {
            return Ok(None);
        };
        let bytes = self.download(&meta.id).await?;
        Ok(Some(VersionedBlob {
            bytes,
            version: meta.version,
        }))
    }

    async fn write(
        &self,
        name: &str,
        bytes: Vec<u8>,
        expected_version: Option<&str>,
    ) -> StoreResult<String> {
        // Drive has no conditional update, so this narrows the race rather than closing it.
        let existing = self.find_by_name(name).await?;
        check_version(
            name,
            expected_version,
            existing.as_ref().map(|m| m.version.as_str()),
        )?;
        let written = match existing {
            Some(meta) => self.update(name, &meta.id, bytes).await?,
            None => self.create(name, &bytes).await?,
        };
        tracing::debug!("Wrote {} ({}) at version {}", name, written.id, written.version);
        Ok(written.version)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use axum::{
        body::Bytes,
        extract::{Path, Query, State},
        http::{header, HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post},
        Form, Json, Router,
    };

    use super::*;
    use crate::storage::StoreError;

    const TEST_KEY: &str = include_str!("testdata/service-account-key.pem");
    const FOLDER: &str = "folder-1";

    struct StoredFile {
        id: String,
        name: String,
        parents: Vec<String>,
        version: u64,
        bytes: Vec<u8>,
    }

    /// Just enough of Drive v3 and the token endpoint to exercise the client
    #[derive(Default)]
    struct FakeDrive {
        token_calls: AtomicUsize,
        flaky_downloads: AtomicUsize,
        queries: Mutex<Vec<String>>,
        files: Mutex<Vec<StoredFile>>,
    }

    type Fake = Arc<FakeDrive>;

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get(header::AUTHORIZATION)
            .map(|h| h == "Bearer fake-token")
            .unwrap_or(false)
    }

    fn meta(file: &StoredFile) -> serde_json::Value {
        serde_json::json!({ "id": file.id, "version": file.version.to_string() })
    }

    async fn token(
        State(fake): State<Fake>,
        Form(form): Form<HashMap<String, String>>,
    ) -> Response {
        if form.get("grant_type").map(String::as_str)
            != Some("urn:ietf:params:oauth:grant-type:jwt-bearer")
            || form.get("assertion").map_or(true, |a| a.split('.').count() != 3)
        {
            return StatusCode::BAD_REQUEST.into_response();
        }
        fake.token_calls.fetch_add(1, Ordering::SeqCst);
        // Slow enough that concurrent callers pile up behind the refresh
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        Json(serde_json::json!({ "access_token": "fake-token", "expires_in": 3600 }))
            .into_response()
    }

    /// The name inside `name = '...'`, with the query escapes undone
    fn queried_name(q: &str) -> Option<String> {
        let rest = q.strip_prefix("name = '")?;
        let mut name = String::new();
        let mut chars = rest.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => name.push(chars.next()?),
                '\'' => return Some(name),
                c => name.push(c),
            }
        }
        None
    }

    async fn list(
        State(fake): State<Fake>,
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        let q = params.get("q").cloned().unwrap_or_default();
        fake.queries.lock().unwrap().push(q.clone());
        if q.contains("mimeType contains 'image/'") {
            let page = match params.get("pageToken").map(String::as_str) {
                None => serde_json::json!({
                    "files": [{ "id": "img-1", "name": "cat.png" }],
                    "nextPageToken": "page-2",
                }),
                Some("page-2") => serde_json::json!({
                    "files": [{
                        "id": "img-2",
                        "name": "dog.jpg",
                        "thumbnailLink": "https://thumbs.example/dog=s220",
                    }],
                }),
                Some(_) => return StatusCode::BAD_REQUEST.into_response(),
            };
            return Json(page).into_response();
        }
        let Some(name) = queried_name(&q) else {
            return StatusCode::BAD_REQUEST.into_response();
        };
        let files = fake.files.lock().unwrap();
        let found: Vec<_> = files
            .iter()
            .filter(|f| f.name == name && f.parents.iter().any(|p| q.contains(p.as_str())))
            .map(meta)
            .collect();
        Json(serde_json::json!({ "files": found })).into_response()
    }

    async fn media(
        State(fake): State<Fake>,
        headers: HeaderMap,
        Path(id): Path<String>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        if params.get("alt").map(String::as_str) != Some("media") {
            return StatusCode::BAD_REQUEST.into_response();
        }
        if id == "flaky" {
            fake.flaky_downloads.fetch_add(1, Ordering::SeqCst);
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
        let files = fake.files.lock().unwrap();
        match files.iter().find(|f| f.id == id) {
            Some(file) => file.bytes.clone().into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    /// Split a `multipart/related` body into the metadata and the content
    fn parse_multipart(content_type: &str, body: &str) -> Option<(serde_json::Value, Vec<u8>)> {
        let boundary = content_type.strip_prefix("multipart/related; boundary=")?;
        let parts: Vec<&str> = body.split(&format!("--{}", boundary)).collect();
        if parts.len() != 4 || parts[3] != "--\r\n" {
            return None;
        }
        let payload = |part: &str| -> Option<String> {
            let (_, data) = part.split_once("\r\n\r\n")?;
            Some(data.strip_suffix("\r\n")?.to_string())
        };
        let metadata = serde_json::from_str(&payload(parts[1])?).ok()?;
        Some((metadata, payload(parts[2])?.into_bytes()))
    }

    async fn create(
        State(fake): State<Fake>,
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
        body: String,
    ) -> Response {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default();
        let parsed = parse_multipart(content_type, &body);
        let (Some("multipart"), Some((metadata, bytes))) =
            (params.get("uploadType").map(String::as_str), parsed)
        else {
            return StatusCode::BAD_REQUEST.into_response();
        };
        let mut files = fake.files.lock().unwrap();
        let file = StoredFile {
            id: format!("file-{}", files.len() + 1),
            name: metadata["name"].as_str().unwrap_or_default().into(),
            parents: serde_json::from_value(metadata["parents"].clone()).unwrap_or_default(),
            version: 1,
            bytes,
        };
        let response = meta(&file);
        files.push(file);
        Json(response).into_response()
    }

    async fn update(
        State(fake): State<Fake>,
        headers: HeaderMap,
        Path(id): Path<String>,
        Query(params): Query<HashMap<String, String>>,
        body: Bytes,
    ) -> Response {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        if params.get("uploadType").map(String::as_str) != Some("media") {
            return StatusCode::BAD_REQUEST.into_response();
        }
        let mut files = fake.files.lock().unwrap();
        match files.iter_mut().find(|f| f.id == id) {
            Some(file) => {
                file.version += 1;
                file.bytes = body.to_vec();
                Json(meta(file)).into_response()
            }
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    /// Serve the fake on a random local port and point a client at it
    async fn fake_drive() -> (DriveClient, Fake, tempfile::TempDir) {
        let fake = Fake::default();
        let app = Router::new()
            .route("/token", post(token))
            .route("/drive/v3/files", get(list))
            .route("/drive/v3/files/:id", get(media))
            .route("/upload/drive/v3/files", post(create))
            .route("/upload/drive/v3/files/:id", axum::routing::patch(update))
            .with_state(fake.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        let server = format!("http://{}", addr);

        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("service-account.json");
        let key = serde_json::json!({
            "type": "service_account",
            "client_email": "gallery@test.iam.gserviceaccount.com",
            "private_key": TEST_KEY,
            "token_uri": format!("{}/token", server),
        });
        std::fs::write(&key_path, key.to_string()).unwrap();
        let conf = DriveConfig {
            api_base: format!("{}/", server),
            folder_id: FOLDER.into(),
            credentials_path: key_path.to_string_lossy().into_owned(),
            ..DriveConfig::default()
        };
        (DriveClient::from_config(&conf).unwrap(), fake, dir)
    }

    #[tokio::test]
    async fn listing_follows_page_tokens() {
        let (drive, fake, _dir) = fake_drive().await;
        let files = drive.list_images().await.unwrap();
        assert_eq!(
            files.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(),
            vec!["img-1", "img-2"]
        );
        assert_eq!(files[0].thumbnail_link, None);
        assert_eq!(
            files[1].thumbnail_link.as_deref(),
            Some("https://thumbs.example/dog=s220")
        );
        // Both pages reuse the first token
        assert_eq!(fake.token_calls.load(Ordering::SeqCst), 1);
        assert!(fake.queries.lock().unwrap()[0].starts_with("'folder-1' in parents"));
    }

    #[tokio::test]
    async fn quotes_in_names_are_escaped() {
        let (drive, fake, _dir) = fake_drive().await;
        assert_eq!(drive.read("it's.json").await.unwrap(), None);
        assert_eq!(
            fake.queries.lock().unwrap()[0],
            "name = 'it\\'s.json' and 'folder-1' in parents and trashed = false"
        );

        drive.write("it's.json", b"{}".to_vec(), None).await.unwrap();
        let blob = drive.read("it's.json").await.unwrap().unwrap();
        assert_eq!(blob.bytes, b"{}");
    }

    #[tokio::test]
    async fn first_write_creates_the_file_and_later_writes_update_it() {
        let (drive, fake, _dir) = fake_drive().await;
        let version = drive
            .write("db.json", br#"{"votes":{}}"#.to_vec(), None)
            .await
            .unwrap();
        assert_eq!(version, "1");
        {
            let files = fake.files.lock().unwrap();
            assert_eq!(files.len(), 1);
            assert_eq!(files[0].name, "db.json");
            assert_eq!(files[0].parents, vec![FOLDER.to_string()]);
            assert_eq!(files[0].bytes, br#"{"votes":{}}"#);
        }

        let blob = drive.read("db.json").await.unwrap().unwrap();
        assert_eq!(blob.version, "1");
        assert_eq!(blob.bytes, br#"{"votes":{}}"#);

        let version = drive
            .write("db.json", br#"{"votes":{"a":3}}"#.to_vec(), Some("1"))
            .await
            .unwrap();
        assert_eq!(version, "2");
        assert_eq!(fake.files.lock().unwrap().len(), 1);
        let blob = drive.read("db.json").await.unwrap().unwrap();
        assert_eq!(blob.bytes, br#"{"votes":{"a":3}}"#);
    }

    #[tokio::test]
    async fn stale_versions_conflict() {
        let (drive, fake, _dir) = fake_drive().await;
        drive.write("db.json", b"{}".to_vec(), None).await.unwrap();
        drive.write("db.json", b"{}".to_vec(), Some("1")).await.unwrap();

        let err = drive
            .write("db.json", b"{\"lost\":true}".to_vec(), Some("1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }), "{}", err);
        // Somebody created it since we looked
        let err = drive.write("db.json", b"{}".to_vec(), None).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }), "{}", err);
        assert_eq!(fake.files.lock().unwrap()[0].version, 2);
    }

    #[tokio::test]
    async fn downloads_give_up_after_three_attempts() {
        let (drive, fake, _dir) = fake_drive().await;
        assert!(drive.download("flaky").await.is_err());
        assert_eq!(fake.flaky_downloads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_token() {
        let (drive, fake, _dir) = fake_drive().await;
        let (a, b, c) = tokio::join!(
            drive.access_token(),
            drive.access_token(),
            drive.access_token()
        );
        assert_eq!(a.unwrap(), "fake-token");
        assert_eq!(b.unwrap(), "fake-token");
        assert_eq!(c.unwrap(), "fake-token");
        assert_eq!(fake.token_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn multipart_body_has_both_parts() {
        let metadata = serde_json::json!({ "name": "db.json" });
        let (content_type, body) = multipart_body(&metadata, b"{\"a\":1}");
        let (parsed, content) =
            parse_multipart(&content_type, &String::from_utf8(body).unwrap()).unwrap();
        assert_eq!(parsed, metadata);
        assert_eq!(content, b"{\"a\":1}");
    }
}
