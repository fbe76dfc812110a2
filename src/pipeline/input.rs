//! Source documents: load a PDF from disk, memory or a URL.
//!
//! A [`SourceDocument`] holds the whole PDF in memory together with its
//! name and page count. The PDF magic bytes (`%PDF`) are checked up front
//! so a wrong file fails with a clear error instead of a parser error
//! deep inside the splitter.

use crate::error::PipelineError;
use crate::persist::write_atomic;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// An uploaded PDF, immutable once loaded.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    name: String,
    bytes: Vec<u8>,
    page_count: usize,
}

impl SourceDocument {
    /// Wrap in-memory bytes. `name` is the file name used for unit names.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, PipelineError> {
        let name = name.into();
        check_magic(&name, &bytes)?;
        let page_count = lopdf::Document::load_mem(&bytes)
            .map_err(|e| PipelineError::Split {
                name: name.clone(),
                detail: e.to_string(),
            })?
            .get_pages()
            .len();
        if page_count == 0 {
            return Err(PipelineError::Split {
                name,
                detail: "document has no pages".into(),
            });
        }
        debug!("Loaded {} ({} bytes, {} pages)", name, bytes.len(), page_count);
        Ok(Self {
            name,
            bytes,
            page_count,
        })
    }

    /// Read a local PDF file.
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PipelineError::FileNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => PipelineError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => PipelineError::Internal(format!("cannot read {}: {}", path.display(), e)),
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());
        Self::from_bytes(name, bytes)
    }

    /// Resolve a path or HTTP(S) URL.
    pub async fn resolve(input: &str, timeout_secs: u64) -> Result<Self, PipelineError> {
        if is_url(input) {
            download_url(input, timeout_secs).await
        } else {
            Self::from_path(Path::new(input))
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// File name without the `.pdf` extension; prefix of every unit name.
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.name)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Save a copy into `upload_dir` and return its path.
    pub fn save_to(&self, upload_dir: &Path) -> Result<PathBuf, PipelineError> {
        let path = upload_dir.join(&self.name);
        write_atomic(&path, &self.bytes)?;
        info!("Saved {} to {}", self.name, path.display());
        Ok(path)
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

fn check_magic(name: &str, bytes: &[u8]) -> Result<(), PipelineError> {
    if bytes.starts_with(b"%PDF") {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    let n = bytes.len().min(4);
    magic[..n].copy_from_slice(&bytes[..n]);
    Err(PipelineError::NotAPdf {
        name: name.to_string(),
        magic,
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<SourceDocument, PipelineError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| PipelineError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            PipelineError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    SourceDocument::from_bytes(filename_from_url(url), bytes.to_vec())
}

/// Last path segment of the URL when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}
