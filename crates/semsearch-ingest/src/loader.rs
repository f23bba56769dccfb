//! Document loaders for local files and remote URLs.
//!
//! A source identifier is resolved to exactly one loader: anything that starts
//! with `scheme://` is remote, everything else is a filesystem path.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use semsearch_core::config::IngestConfig;
use semsearch_core::{Document, Result, SearchError};
use tracing::debug;
use url::Url;

use crate::html;

const USER_AGENT: &str = concat!("semsearch/", env!("CARGO_PKG_VERSION"));

/// Bytes inspected when deciding whether a file is binary.
const BINARY_SNIFF_LEN: usize = 8192;

/// Produces the documents behind one source identifier.
pub trait DocumentLoader: Send + Sync {
    /// Read the source. Failures are reported as `LoadFailure` naming the
    /// exact path or URL that could not be read.
    fn load(&self) -> impl Future<Output = Result<Vec<Document>>> + Send;
}

/// Return the URL scheme if `source` starts with `scheme://`.
pub fn url_scheme(source: &str) -> Option<&str> {
    let (scheme, _) = source.split_once("://")?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    let valid = first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}

/// True if `source` names a remote resource.
pub fn is_remote(source: &str) -> bool {
    url_scheme(source).is_some()
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Builds the loader matching each source identifier.
#[derive(Debug, Clone)]
pub struct LoaderRegistry {
    client: reqwest::Client,
    extensions: Vec<String>,
}

impl LoaderRegistry {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SearchError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        })
    }

    /// Pick the loader for `source`.
    pub fn resolve(&self, source: &str) -> Result<SourceLoader> {
        match url_scheme(source) {
            Some(scheme) if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") => {
                let url = Url::parse(source).map_err(|e| SearchError::load_failure(source, e))?;
                Ok(SourceLoader::Url(UrlLoader::new(url, self.client.clone())))
            }
            Some(scheme) => Err(SearchError::load_failure(
                source,
                format!("unsupported URL scheme: {scheme}"),
            )),
            None => Ok(SourceLoader::File(FileLoader::new(
                source,
                self.extensions.clone(),
            ))),
        }
    }

    /// Resolve and load `source` in one step.
    pub async fn load(&self, source: &str) -> Result<Vec<Document>> {
        self.resolve(source)?.load().await
    }
}

/// A resolved loader.
#[derive(Debug)]
pub enum SourceLoader {
    File(FileLoader),
    Url(UrlLoader),
}

impl DocumentLoader for SourceLoader {
    async fn load(&self) -> Result<Vec<Document>> {
        match self {
            SourceLoader::File(loader) => loader.load().await,
            SourceLoader::Url(loader) => loader.load().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Local files
// ---------------------------------------------------------------------------

/// Loads a text file, or every matching file of a directory.
#[derive(Debug, Clone)]
pub struct FileLoader {
    path: PathBuf,
    extensions: Vec<String>,
}

impl FileLoader {
    /// `extensions` filters directory listings only; an explicitly named file
    /// is always read.
    pub fn new(path: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            path: path.into(),
            extensions,
        }
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }

    /// Files of a directory that match the configured extensions, sorted.
    async fn list_dir(&self) -> Result<Vec<PathBuf>> {
        let origin = self.path.display().to_string();
        let mut entries = tokio::fs::read_dir(&self.path)
            .await
            .map_err(|e| SearchError::load_failure(&origin, e))?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SearchError::load_failure(&origin, e))?
        {
            let path = entry.path();
            if path.is_file() && self.matches_extension(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl DocumentLoader for FileLoader {
    async fn load(&self) -> Result<Vec<Document>> {
        let origin = self.path.display().to_string();
        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| SearchError::load_failure(&origin, e))?;

        if !meta.is_dir() {
            return Ok(vec![read_file(&self.path).await?]);
        }

        let files = self.list_dir().await?;
        debug!(dir = %origin, files = files.len(), "Loading directory");
        let mut documents = Vec::with_capacity(files.len());
        for file in files {
            documents.push(read_file(&file).await?);
        }
        Ok(documents)
    }
}

async fn read_file(path: &Path) -> Result<Document> {
    let origin = path.display().to_string();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| SearchError::load_failure(&origin, e))?;

    if bytes.iter().take(BINARY_SNIFF_LEN).any(|&b| b == 0) {
        return Err(SearchError::load_failure(
            &origin,
            "binary content, no text extractor for this format",
        ));
    }
    let raw = String::from_utf8(bytes).map_err(|e| SearchError::load_failure(&origin, e))?;

    let is_html = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"))
        .unwrap_or(false);

    let mut doc = if is_html {
        let title = html::extract_title(&raw);
        let doc = Document::new(origin.as_str(), html::extract_text(&raw));
        match title {
            Some(title) => doc.with_meta("title", title),
            None => doc,
        }
    } else {
        Document::new(origin.as_str(), raw)
    };

    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        doc = doc.with_meta("file_name", name);
    }
    Ok(doc.with_meta("ingested_at", Utc::now().to_rfc3339()))
}

// ---------------------------------------------------------------------------
// Remote URLs
// ---------------------------------------------------------------------------

/// Fetches one web page over HTTP(S).
#[derive(Debug, Clone)]
pub struct UrlLoader {
    url: Url,
    client: reqwest::Client,
}

impl UrlLoader {
    pub fn new(url: Url, client: reqwest::Client) -> Self {
        Self { url, client }
    }
}

impl DocumentLoader for UrlLoader {
    async fn load(&self) -> Result<Vec<Document>> {
        let origin = self.url.as_str();
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| SearchError::load_failure(origin, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::load_failure(origin, format!("HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| SearchError::load_failure(origin, e))?;

        debug!(url = %origin, bytes = body.len(), content_type = %content_type, "Fetched URL");

        let is_html = content_type.contains("html")
            || (content_type.is_empty() && body.trim_start().starts_with('<'));

        let mut doc = if is_html {
            let doc = Document::new(origin, html::extract_text(&body));
            match html::extract_title(&body) {
                Some(title) => doc.with_meta("title", title),
                None => doc,
            }
        } else {
            Document::new(origin, body)
        };
        if !content_type.is_empty() {
            doc = doc.with_meta("content_type", content_type);
        }
        Ok(vec![doc.with_meta("ingested_at", Utc::now().to_rfc3339())])
    }
}
