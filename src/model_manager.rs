use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::models::BaseModel;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model not downloaded: {0}")]
    NotDownloaded(String),
    #[error("Download error: {0}")]
    DownloadError(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Download of {url} failed with status {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("Hash mismatch for {file}: expected {expected}, got {actual}")]
    HashMismatch {
        file: String,
        expected: String,
        actual: String,
    },
}

/// Resolves base-model identities to local files, downloading and caching
/// them as needed.
///
/// Upstream files carry no pinned hashes, so integrity checking records a
/// sha256 sidecar at download time and verifies against it later; this
/// detects local corruption between runs rather than upstream tampering.
#[derive(Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
    download_lock: Arc<Mutex<()>>,
}

impl ModelManager {
    /// Creates a new ModelManager with the default models directory.
    pub fn new_default() -> io::Result<Self> {
        Self::new(Self::get_default_models_dir())
    }

    /// Returns the default models directory path.
    pub fn get_default_models_dir() -> PathBuf {
        // 1. Check environment variable
        if let Ok(path) = env::var("MEDVIT_CACHE") {
            return PathBuf::from(path).join("models");
        }

        // 2. Use platform-specific cache directory
        if let Some(cache_dir) = dirs::cache_dir() {
            return cache_dir.join("medvit").join("models");
        }

        // 3. Fallback to user's home directory
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(".cache").join("medvit").join("models");
        }

        // 4. If all else fails, use system temp directory
        env::temp_dir().join("medvit").join("models")
    }

    pub fn new<P: AsRef<Path>>(models_dir: P) -> io::Result<Self> {
        let models_dir = models_dir.as_ref().to_path_buf();
        fs::create_dir_all(&models_dir)?;
        Ok(Self {
            models_dir,
            download_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Local directory holding a base model's files.
    pub fn model_dir(&self, model: BaseModel) -> PathBuf {
        self.models_dir.join(model.info().name)
    }

    fn file_path(&self, model: BaseModel, file: &str) -> PathBuf {
        self.model_dir(model).join(file)
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".sha256");
        path.with_file_name(name)
    }

    fn file_url(model: BaseModel, file: &str) -> String {
        format!(
            "https://huggingface.co/{}/resolve/main/{}",
            model.info().repo_id,
            file
        )
    }

    pub fn is_model_downloaded(&self, model: BaseModel) -> bool {
        model.info().files.iter().all(|file| {
            let path = self.file_path(model, file);
            log::debug!("  {:?} (exists: {})", path, path.exists());
            path.exists()
        })
    }

    /// Downloads every file of the model that is missing or fails its
    /// recorded-hash check. Serialized so concurrent callers cannot clobber
    /// each other's partial downloads.
    pub async fn download_model(&self, model: BaseModel) -> Result<(), ModelError> {
        let info = model.info();
        let _lock = self.download_lock.lock().await;

        let model_dir = self.model_dir(model);
        log::info!("Ensuring model directory at {:?}", model_dir);
        fs::create_dir_all(&model_dir)?;

        for file in info.files {
            let path = self.file_path(model, file);
            if path.exists() && self.verify_file(&path)? {
                log::info!("{} already present and verified", file);
                continue;
            }
            if path.exists() {
                log::warn!("{} failed verification, redownloading", file);
            }
            if let Err(e) = self.download_and_record(model, file, &path).await {
                log::error!("Failed to fetch {}: {}", file, e);
                // Leave no half-fetched model behind
                let _ = self.remove_download(model);
                return Err(e);
            }
        }

        log::info!("Model {} ready to use", info.name);
        Ok(())
    }

    async fn download_and_record(
        &self,
        model: BaseModel,
        file: &str,
        path: &Path,
    ) -> Result<(), ModelError> {
        let url = Self::file_url(model, file);
        log::info!("Downloading {} to {:?}", url, path);
        let response = reqwest::get(&url).await?;
        if !response.status().is_success() {
            return Err(ModelError::HttpStatus {
                url,
                status: response.status(),
            });
        }
        let bytes = response.bytes().await?;
        log::info!("Downloaded {} bytes", bytes.len());

        let hash = sha256_hex(&bytes);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &bytes)?;
        fs::write(Self::sidecar_path(path), &hash)?;

        // Re-read to confirm what landed on disk is what was hashed
        if !self.verify_file(path)? {
            return Err(ModelError::HashMismatch {
                file: file.to_string(),
                expected: hash,
                actual: "corrupted write".to_string(),
            });
        }
        log::info!("{} downloaded and verified ({})", file, hash);
        Ok(())
    }

    /// Checks one file against its recorded hash. Files without a sidecar
    /// (e.g. placed in the cache by hand) are accepted as-is.
    fn verify_file(&self, path: &Path) -> Result<bool, ModelError> {
        let sidecar = Self::sidecar_path(path);
        if !sidecar.exists() {
            return Ok(true);
        }
        let expected = fs::read_to_string(&sidecar)?;
        let bytes = fs::read(path)?;
        let actual = sha256_hex(&bytes);
        Ok(actual == expected.trim())
    }

    pub fn verify_model(&self, model: BaseModel) -> Result<bool, ModelError> {
        for file in model.info().files {
            let path = self.file_path(model, file);
            if !path.exists() || !self.verify_file(&path)? {
                log::info!("Verification failed for {:?}", path);
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn remove_download(&self, model: BaseModel) -> Result<(), ModelError> {
        for file in model.info().files {
            let path = self.file_path(model, file);
            if path.exists() {
                fs::remove_file(&path)?;
            }
            let sidecar = Self::sidecar_path(&path);
            if sidecar.exists() {
                fs::remove_file(&sidecar)?;
            }
        }
        Ok(())
    }

    /// Ensures that a model is downloaded and verified.
    /// If the model doesn't exist, it will be downloaded.
    /// If verification fails, it will be re-downloaded.
    pub async fn ensure_model_downloaded(&self, model: BaseModel) -> Result<(), ModelError> {
        log::info!("Checking if model {:?} is downloaded...", model);
        if !self.is_model_downloaded(model) {
            log::info!("Model not found, downloading...");
            self.download_model(model).await?;
        } else if !self.verify_model(model)? {
            log::info!("Model verification failed, re-downloading...");
            self.remove_download(model)?;
            self.download_model(model).await?;
        } else {
            log::info!("Model verification successful");
        }
        Ok(())
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
