//! External corpus store collaborator.
//!
//! A corpus is a named, searchable collection the knowledge gateway retrieves
//! from. The registry never searches corpora itself; it only needs to create
//! them, push files into them, list what they hold, and delete from them.
//!
//! | Provider | Backing |
//! |----------|---------|
//! | [`DirectoryCorpusStore`] | one directory per corpus under a local root |
//! | [`GeminiFileSearchStore`] | Gemini File Search stores over REST |

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::CorpusStoreConfig;
use crate::error::{GatewayError, GatewayResult};

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_UPLOAD_BASE: &str = "https://generativelanguage.googleapis.com/upload/v1beta";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CorpusRef {
    /// Provider resource name.
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RemoteDocument {
    /// Provider resource name, accepted by [`CorpusStore::remove`].
    pub name: String,
    pub display_name: String,
}

#[async_trait]
pub trait CorpusStore: Send + Sync {
    /// Find a corpus by display name, creating it when absent.
    async fn ensure_corpus(&self, display_name: &str) -> GatewayResult<String>;

    async fn list_corpora(&self) -> GatewayResult<Vec<CorpusRef>>;

    /// Push a local file and wait for indexing to finish.
    ///
    /// Returns the provider's document reference.
    async fn ingest(
        &self,
        corpus: &str,
        local_path: &Path,
        display_name: &str,
    ) -> GatewayResult<String>;

    async fn list_documents(&self, corpus: &str) -> GatewayResult<Vec<RemoteDocument>>;

    async fn remove(&self, document: &str) -> GatewayResult<()>;

    async fn delete_corpus(&self, corpus: &str, cascade: bool) -> GatewayResult<()>;
}

pub fn create_store(config: &CorpusStoreConfig) -> Result<Arc<dyn CorpusStore>> {
    match config.provider.as_str() {
        "directory" => {
            let root = config
                .root
                .clone()
                .ok_or_else(|| anyhow::anyhow!("corpus_store.root is required"))?;
            Ok(Arc::new(DirectoryCorpusStore::new(root)))
        }
        "gemini" => Ok(Arc::new(GeminiFileSearchStore::new(config)?)),
        other => anyhow::bail!("Unknown corpus store provider: {}", other),
    }
}

/// MIME type sent with an upload, keyed on lowercase extension.
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "hwp" => "application/x-hwp",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "doc" => "application/msword",
        "txt" => "text/plain",
        "json" => "application/json",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "md" => "text/markdown",
        "csv" => "text/csv",
        _ => return None,
    })
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

// ============ Directory ============

/// Corpora as plain directories: `<root>/<display name>/<file>`.
pub struct DirectoryCorpusStore {
    root: PathBuf,
}

impl DirectoryCorpusStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn checked_component<'a>(&self, name: &'a str) -> GatewayResult<&'a str> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
        {
            return Err(GatewayError::Validation(format!(
                "'{}' is not a valid corpus or document name",
                name
            )));
        }
        Ok(name)
    }

    fn resolve(&self, reference: &str) -> GatewayResult<PathBuf> {
        let mut path = self.root.clone();
        for part in reference.split('/') {
            path.push(self.checked_component(part)?);
        }
        Ok(path)
    }
}

#[async_trait]
impl CorpusStore for DirectoryCorpusStore {
    async fn ensure_corpus(&self, display_name: &str) -> GatewayResult<String> {
        let name = self.checked_component(display_name)?;
        let dir = self.root.join(name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| GatewayError::io(&dir, e))?;
        Ok(name.to_string())
    }

    async fn list_corpora(&self) -> GatewayResult<Vec<CorpusRef>> {
        let mut out = Vec::new();
        if !self.root.exists() {
            return Ok(out);
        }
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| GatewayError::io(&self.root, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| GatewayError::io(&self.root, e))?
        {
            if entry.path().is_dir() {
                let name = entry.file_name().to_string_lossy().to_string();
                out.push(CorpusRef {
                    name: name.clone(),
                    display_name: name,
                });
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn ingest(
        &self,
        corpus: &str,
        local_path: &Path,
        display_name: &str,
    ) -> GatewayResult<String> {
        let target = self.resolve(corpus)?.join(self.checked_component(display_name)?);
        tokio::fs::copy(local_path, &target)
            .await
            .map_err(|e| GatewayError::io(local_path, e))?;
        debug!(corpus, file = display_name, "copied into directory corpus");
        Ok(format!("{}/{}", corpus, display_name))
    }

    async fn list_documents(&self, corpus: &str) -> GatewayResult<Vec<RemoteDocument>> {
        let dir = self.resolve(corpus)?;
        let mut out = Vec::new();
        if !dir.exists() {
            return Ok(out);
        }
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| GatewayError::io(&dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| GatewayError::io(&dir, e))?
        {
            if entry.path().is_file() {
                let display_name = entry.file_name().to_string_lossy().to_string();
                out.push(RemoteDocument {
                    name: format!("{}/{}", corpus, display_name),
                    display_name,
                });
            }
        }
        out.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(out)
    }

    async fn remove(&self, document: &str) -> GatewayResult<()> {
        let path = self.resolve(document)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| GatewayError::io(&path, e))
    }

    async fn delete_corpus(&self, corpus: &str, cascade: bool) -> GatewayResult<()> {
        let dir = self.resolve(corpus)?;
        let result = if cascade {
            tokio::fs::remove_dir_all(&dir).await
        } else {
            tokio::fs::remove_dir(&dir).await
        };
        result.map_err(|e| GatewayError::io(&dir, e))
    }
}

// ============ Gemini File Search ============

/// Gemini File Search stores.
///
/// Uploads use the multipart upload endpoint and then poll the returned
/// long-running operation every `poll_interval_secs` until it reports
/// `done`, giving up after `max_poll_secs`.
pub struct GeminiFileSearchStore {
    api_key: String,
    client: reqwest::Client,
    poll_interval: Duration,
    max_poll: Duration,
}

impl GeminiFileSearchStore {
    pub fn new(config: &CorpusStoreConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            api_key,
            client,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_poll: Duration::from_secs(config.max_poll_secs),
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> GatewayResult<serde_json::Value> {
        let response = request
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| GatewayError::ExternalService(e.to_string()))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(GatewayError::ExternalService(format!(
                "File Search API error {}: {}",
                status, text
            )));
        }
        if text.trim().is_empty() {
            return Ok(serde_json::json!({}));
        }
        serde_json::from_str(&text)
            .map_err(|e| GatewayError::ExternalService(format!("invalid response: {}", e)))
    }

    /// Follow `nextPageToken` until exhausted, collecting `items_key` arrays.
    async fn list_paged(&self, url: &str, items_key: &str) -> GatewayResult<Vec<serde_json::Value>> {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.client.get(url).query(&[("pageSize", "20")]);
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let json = self.send(request).await?;
            if let Some(items) = json.get(items_key).and_then(|v| v.as_array()) {
                out.extend(items.iter().cloned());
            }
            page_token = json
                .get("nextPageToken")
                .and_then(|t| t.as_str())
                .filter(|t| !t.is_empty())
                .map(|t| t.to_string());
            if page_token.is_none() {
                return Ok(out);
            }
        }
    }

    async fn wait_for_operation(
        &self,
        mut operation: serde_json::Value,
        display_name: &str,
    ) -> GatewayResult<serde_json::Value> {
        let started = tokio::time::Instant::now();
        loop {
            if operation.get("done").and_then(|d| d.as_bool()) == Some(true) {
                if let Some(err) = operation.get("error") {
                    return Err(GatewayError::ExternalService(format!(
                        "indexing {} failed: {}",
                        display_name, err
                    )));
                }
                return Ok(operation);
            }
            if started.elapsed() >= self.max_poll {
                return Err(GatewayError::Timeout(format!(
                    "indexing {} did not finish within {}s",
                    display_name,
                    self.max_poll.as_secs()
                )));
            }
            let name = operation
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| {
                    GatewayError::ExternalService("upload returned no operation name".into())
                })?
                .to_string();
            tokio::time::sleep(self.poll_interval).await;
            operation = self
                .send(self.client.get(format!("{}/{}", GEMINI_BASE, name)))
                .await?;
        }
    }
}

fn to_ref(value: &serde_json::Value) -> Option<(String, String)> {
    let name = value.get("name")?.as_str()?.to_string();
    let display_name = value
        .get("displayName")
        .and_then(|d| d.as_str())
        .unwrap_or_default()
        .to_string();
    Some((name, display_name))
}

/// `multipart/related` body: JSON metadata part followed by the file bytes.
fn multipart_related(
    boundary: &str,
    metadata: &serde_json::Value,
    mime: &str,
    bytes: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n--{b}\r\nContent-Type: {mime}\r\n\r\n",
            b = boundary,
            meta = metadata,
            mime = mime
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

#[async_trait]
impl CorpusStore for GeminiFileSearchStore {
    async fn ensure_corpus(&self, display_name: &str) -> GatewayResult<String> {
        for corpus in self.list_corpora().await? {
            if corpus.display_name == display_name {
                return Ok(corpus.name);
            }
        }

        let created = self
            .send(
                self.client
                    .post(format!("{}/fileSearchStores", GEMINI_BASE))
                    .json(&serde_json::json!({ "displayName": display_name })),
            )
            .await?;
        let (name, _) = to_ref(&created).ok_or_else(|| {
            GatewayError::ExternalService("store creation returned no name".into())
        })?;
        info!(corpus = %name, display_name, "created file search store");
        Ok(name)
    }

    async fn list_corpora(&self) -> GatewayResult<Vec<CorpusRef>> {
        let items = self
            .list_paged(&format!("{}/fileSearchStores", GEMINI_BASE), "fileSearchStores")
            .await?;
        Ok(items
            .iter()
            .filter_map(to_ref)
            .map(|(name, display_name)| CorpusRef { name, display_name })
            .collect())
    }

    async fn ingest(
        &self,
        corpus: &str,
        local_path: &Path,
        display_name: &str,
    ) -> GatewayResult<String> {
        let ext = extension_of(local_path);
        let mime = mime_for_extension(&ext).ok_or_else(|| {
            GatewayError::Validation(format!("unsupported file type: .{}", ext))
        })?;
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| GatewayError::io(local_path, e))?;

        let boundary = format!("kbg-{}", uuid::Uuid::new_v4().simple());
        let body = multipart_related(
            &boundary,
            &serde_json::json!({ "displayName": display_name }),
            mime,
            &bytes,
        );

        let operation = self
            .send(
                self.client
                    .post(format!(
                        "{}/{}:uploadToFileSearchStore",
                        GEMINI_UPLOAD_BASE, corpus
                    ))
                    .query(&[("uploadType", "multipart")])
                    .header(
                        "Content-Type",
                        format!("multipart/related; boundary={}", boundary),
                    )
                    .body(body),
            )
            .await?;

        let done = self.wait_for_operation(operation, display_name).await?;
        Ok(done
            .pointer("/response/documentName")
            .and_then(|n| n.as_str())
            .unwrap_or(corpus)
            .to_string())
    }

    async fn list_documents(&self, corpus: &str) -> GatewayResult<Vec<RemoteDocument>> {
        let items = self
            .list_paged(&format!("{}/{}/documents", GEMINI_BASE, corpus), "documents")
            .await?;
        Ok(items
            .iter()
            .filter_map(to_ref)
            .map(|(name, display_name)| RemoteDocument { name, display_name })
            .collect())
    }

    async fn remove(&self, document: &str) -> GatewayResult<()> {
        self.send(
            self.client
                .delete(format!("{}/{}", GEMINI_BASE, document))
                .query(&[("force", "true")]),
        )
        .await
        .map(|_| ())
    }

    async fn delete_corpus(&self, corpus: &str, cascade: bool) -> GatewayResult<()> {
        self.send(
            self.client
                .delete(format!("{}/{}", GEMINI_BASE, corpus))
                .query(&[("force", if cascade { "true" } else { "false" })]),
        )
        .await
        .map(|_| ())
    }
}
