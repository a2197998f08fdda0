use std::{
    fs,
    path::{Path, PathBuf},
};

use actix_web::dev::ConnectionInfo;
use uuid::Uuid;

use crate::errors::AppError;

/// URL prefix under which stored images are served.
pub const PUBLIC_PREFIX: &str = "/static/uploads";

/// Blocking sink for uploaded product images.
pub trait ImageStore: Send + Sync {
    /// Copies the file at `source` into the store and returns its stored file name.
    fn store(&self, source: &Path, original_name: Option<&str>) -> Result<String, AppError>;

    /// Deletes a previously stored file. A file that is already gone is not an error.
    fn remove(&self, file_name: &str) -> Result<(), AppError>;
}

#[derive(Debug, Clone)]
pub struct LocalImageStore {
    root: PathBuf,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, AppError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(LocalImageStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ImageStore for LocalImageStore {
    fn store(&self, source: &Path, original_name: Option<&str>) -> Result<String, AppError> {
        let file_name = format!("{}{}", Uuid::new_v4(), extension_of(original_name));
        let dest = self.root.join(&file_name);
        fs::copy(source, &dest).map_err(|e| {
            log::error!("Failed to store image at {}: {}", dest.display(), e);
            AppError::IoError(e)
        })?;
        log::info!("Stored image {}", dest.display());
        Ok(file_name)
    }

    fn remove(&self, file_name: &str) -> Result<(), AppError> {
        let path = self.root.join(file_name);
        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!("Removed image {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::IoError(e)),
        }
    }
}

/// Lower-cased `.ext` of the uploaded name, or empty if it has none worth keeping.
fn extension_of(original_name: Option<&str>) -> String {
    original_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

pub fn public_url(conn: &ConnectionInfo, file_name: &str) -> String {
    format!("{}://{}{}/{}", conn.scheme(), conn.host(), PUBLIC_PREFIX, file_name)
}
