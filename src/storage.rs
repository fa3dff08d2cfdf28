use rand::Rng;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const MAX_NAME_ATTEMPTS: usize = 100;

/// Flat directory of uploaded blobs, addressed by stored name.
#[derive(Debug, Clone)]
pub struct MediaStorage {
    root: PathBuf,
}

/// A blob moved aside while its record is being deleted.
#[derive(Debug)]
pub struct StagedRemoval {
    original: PathBuf,
    staged: PathBuf,
}

impl MediaStorage {
    pub async fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a stored name to its path. Anything that is not a plain,
    /// visible file name is refused.
    pub fn path_of(&self, name: &str) -> Option<PathBuf> {
        let plain = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(|c: char| c == '/' || c == '\\' || c == '\0');
        plain.then(|| self.root.join(name))
    }

    /// Writes `data` under a sanitized form of `original_name`, suffixing a
    /// random token when that name is already in use. Returns the stored name.
    pub async fn save(&self, original_name: &str, data: &[u8]) -> io::Result<String> {
        let base = sanitize_name(original_name);
        let (stem, ext) = split_name(&base);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = if attempt == 0 {
                base.clone()
            } else {
                format!("{}_{}{}", stem, random_suffix(), ext)
            };

            let path = self.root.join(&candidate);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    if let Err(e) = write_all(&mut file, data).await {
                        let _ = fs::remove_file(&path).await;
                        return Err(e);
                    }
                    return Ok(candidate);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free name for {}", base),
        ))
    }

    pub async fn remove(&self, name: &str) -> io::Result<()> {
        let path = self
            .path_of(name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid stored name"))?;
        fs::remove_file(path).await
    }

    /// Moves the blob aside. `Ok(None)` when there was nothing to move.
    pub async fn stage_removal(&self, name: &str) -> io::Result<Option<StagedRemoval>> {
        let original = self
            .path_of(name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid stored name"))?;
        let staged = self
            .root
            .join(format!(".{}.trash-{}", name, Uuid::new_v4().simple()));

        match fs::rename(&original, &staged).await {
            Ok(()) => Ok(Some(StagedRemoval { original, staged })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn restore(&self, staged: StagedRemoval) -> io::Result<()> {
        fs::rename(&staged.staged, &staged.original).await
    }

    pub async fn purge(&self, staged: StagedRemoval) -> io::Result<()> {
        fs::remove_file(&staged.staged).await
    }
}

async fn write_all(file: &mut fs::File, data: &[u8]) -> io::Result<()> {
    file.write_all(data).await?;
    file.flush().await
}

/// Keeps the last path component, turns spaces into underscores and drops
/// everything but alphanumerics, `-`, `_` and `.`.
fn sanitize_name(original: &str) -> String {
    let base = original
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(original)
        .trim();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_alphanumeric() || matches!(*c, '-' | '_' | '.'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    }
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(7)
        .map(char::from)
        .collect()
}
