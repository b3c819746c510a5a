use crate::sink::MediaId;
use crate::storage::ActivityStore;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "heic"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// URL can never resolve (no or unsupported extension).
    Unsupported { url: String, reason: String },
    /// Network failure, timeout or bad status.
    Fetch { url: String, reason: String },
    /// Fetched but could not be saved or registered.
    Store { url: String, reason: String },
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::Unsupported { url, reason } => write!(f, "unsupported media {}: {}", url, reason),
            MediaError::Fetch { url, reason } => write!(f, "failed to fetch {}: {}", url, reason),
            MediaError::Store { url, reason } => write!(f, "failed to store {}: {}", url, reason),
        }
    }
}

impl std::error::Error for MediaError {}

/// Turns a remote image URL into a durable media id.
pub trait MediaResolver: Send + Sync {
    fn resolve(&self, url: &str) -> Result<MediaId, MediaError>;

    /// Forget media resolved for a record the sink then refused.
    fn release(&self, _id: MediaId) {}
}

/// Resolve every URL in order, logging and skipping the ones that fail.
pub fn resolve_all(resolver: &dyn MediaResolver, urls: &[String]) -> Vec<MediaId> {
    let mut resolved = Vec::with_capacity(urls.len());
    for url in urls {
        match resolver.resolve(url) {
            Ok(id) => resolved.push(id),
            Err(e @ MediaError::Unsupported { .. }) => {
                warn!(url = %url, error = %e, "Skipping invalid image");
            }
            Err(e) => {
                error!(url = %url, error = %e, "Image processing failed");
            }
        }
    }
    resolved
}

/// Release everything `resolve_all` produced for a record that was not stored.
pub fn release_all(resolver: &dyn MediaResolver, ids: &[MediaId]) {
    for id in ids {
        resolver.release(*id);
    }
}

/// Drop the query string and require a known image extension.
pub fn clean_image_url(url: &str) -> Result<String, MediaError> {
    let base = url.split(['?', '#']).next().unwrap_or(url).trim();
    let file_name = base.rsplit('/').next().unwrap_or_default();
    let extension = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => {
            return Err(MediaError::Unsupported {
                url: url.to_string(),
                reason: "missing file extension".to_string(),
            })
        }
    };
    if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        return Err(MediaError::Unsupported {
            url: url.to_string(),
            reason: format!("unsupported image format: {}", extension),
        });
    }
    Ok(base.to_string())
}

/// Downloads images into the media directory and registers them with the
/// activity store.
pub struct HttpMediaResolver {
    client: Client,
    media_dir: PathBuf,
    library: Arc<ActivityStore>,
}

impl HttpMediaResolver {
    pub fn new(
        media_dir: impl Into<PathBuf>,
        library: Arc<ActivityStore>,
        timeout: Option<Duration>,
    ) -> reqwest::Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            media_dir: media_dir.into(),
            library,
        })
    }

    fn target_path(&self, cleaned_url: &str) -> PathBuf {
        let name = cleaned_url.rsplit('/').next().unwrap_or("image");
        self.media_dir
            .join(format!("{}-{}", uuid::Uuid::new_v4().simple(), sanitize_file_name(name)))
    }
}

impl MediaResolver for HttpMediaResolver {
    fn resolve(&self, url: &str) -> Result<MediaId, MediaError> {
        let cleaned = clean_image_url(url)?;
        info!(url = %cleaned, "Fetching remote image");

        let fetch_err = |reason: String| MediaError::Fetch {
            url: cleaned.clone(),
            reason,
        };
        let response = self
            .client
            .get(&cleaned)
            .send()
            .map_err(|e| fetch_err(e.to_string()))?
            .error_for_status()
            .map_err(|e| fetch_err(e.to_string()))?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        if let Some(ct) = &content_type {
            if !ct.starts_with("image/") {
                return Err(MediaError::Unsupported {
                    url: cleaned.clone(),
                    reason: format!("content type {}", ct),
                });
            }
        }
        let bytes = response.bytes().map_err(|e| fetch_err(e.to_string()))?;

        let store_err = |reason: String| MediaError::Store {
            url: cleaned.clone(),
            reason,
        };
        fs::create_dir_all(&self.media_dir).map_err(|e| store_err(e.to_string()))?;
        let path = self.target_path(&cleaned);
        fs::write(&path, &bytes).map_err(|e| store_err(e.to_string()))?;

        match self
            .library
            .register_media(&cleaned, &path, content_type.as_deref(), bytes.len() as u64)
        {
            Ok(id) => {
                info!(media_id = id.0, path = %path.display(), "Image stored");
                Ok(id)
            }
            Err(e) => {
                let _ = fs::remove_file(&path);
                Err(store_err(e.to_string()))
            }
        }
    }

    fn release(&self, id: MediaId) {
        match self.library.remove_media(id) {
            Ok(Some(local_path)) => {
                if let Err(e) = fs::remove_file(&local_path) {
                    warn!(media_id = id.0, path = %local_path, error = %e, "Could not delete image");
                }
                debug!(media_id = id.0, "Released unused image");
            }
            Ok(None) => {}
            Err(e) => error!(media_id = id.0, error = %e, "Could not release image"),
        }
    }
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}
