//! Package images served from a local directory
//!
//! An image reference maps to an entry of the package directory named
//! after the reference with `/`, `:` and `@` replaced by `_`. The entry is
//! either an unpacked directory or a `.tar.gz` archive of one.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::Archive;
use walkdir::WalkDir;

use pko_engine::RawFiles;
use pko_kube::{ImageSource, KubeError};

use crate::error::{ManagerError, Result};

#[derive(Debug, Clone)]
pub struct DirectoryImageSource {
    root: PathBuf,
}

impl DirectoryImageSource {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::read_dir(&root).map_err(|source| ManagerError::PackageDir {
            path: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    fn entry_name(image: &str) -> String {
        image.replace(['/', ':', '@'], "_")
    }

    fn load(&self, image: &str) -> std::result::Result<RawFiles, String> {
        let name = Self::entry_name(image);
        let dir = self.root.join(&name);
        if dir.is_dir() {
            return read_dir(&dir);
        }
        let archive = self.root.join(format!("{name}.tar.gz"));
        if archive.is_file() {
            return read_archive(&archive);
        }
        Err(format!("no entry {name} in {}", self.root.display()))
    }
}

#[async_trait]
impl ImageSource for DirectoryImageSource {
    async fn pull(&self, image: &str) -> pko_kube::Result<RawFiles> {
        let source = self.clone();
        let reference = image.to_string();
        let loaded = tokio::task::spawn_blocking(move || source.load(&reference))
            .await
            .map_err(|e| e.to_string())
            .and_then(|loaded| loaded);

        match loaded {
            Ok(files) => {
                tracing::debug!(image, files = files.len(), "loaded package image");
                Ok(files)
            }
            Err(message) => Err(KubeError::ImagePull {
                image: image.to_string(),
                message,
            }),
        }
    }
}

fn read_dir(dir: &Path) -> std::result::Result<RawFiles, String> {
    let mut files = RawFiles::new();
    for entry in WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let content = std::fs::read(entry.path()).map_err(|e| format!("{}: {e}", entry.path().display()))?;
        files.insert(to_slash(relative), content);
    }
    Ok(files)
}

fn read_archive(path: &Path) -> std::result::Result<RawFiles, String> {
    let file = std::fs::File::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    let mut files = RawFiles::new();

    let entries = archive.entries().map_err(|e| format!("{}: {e}", path.display()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| format!("{}: {e}", path.display()))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map(|p| to_slash(&p))
            .map_err(|e| format!("{}: {e}", path.display()))?;
        let mut content = Vec::new();
        entry
            .read_to_end(&mut content)
            .map_err(|e| format!("{}: {name}: {e}", path.display()))?;
        files.insert(name.trim_start_matches("./").to_string(), content);
    }
    Ok(files)
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
