//! Gallery of registered subjects.
//!
//! One reference encoding per subject name. Registration overwrites, it
//! never appends. The map is ordered by name so that iteration order (and
//! therefore the matcher's tie-break) does not depend on load order.

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard};

use crate::encode::FaceEncoder;

/// Fixed-length face feature vector produced by a `FaceEncoder`.
pub type Encoding = Vec<f32>;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp"];

#[derive(Clone, Debug, PartialEq)]
pub struct GalleryEntry {
    pub subject_name: String,
    pub encoding: Encoding,
}

/// Readers-writer guarded subject map.
#[derive(Debug, Default)]
pub struct Gallery {
    entries: RwLock<BTreeMap<String, Encoding>>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the encoding for `subject_name`.
    ///
    /// Returns the encoding that was replaced, if any.
    pub fn upsert(&self, subject_name: &str, encoding: Encoding) -> Result<Option<Encoding>> {
        self.upsert_with(subject_name, encoding, || Ok(()))
    }

    /// Like `upsert`, but runs `persist` under the write lock once the
    /// encoding has been validated and before it becomes visible. Nothing
    /// changes when validation or `persist` fails.
    pub fn upsert_with(
        &self,
        subject_name: &str,
        encoding: Encoding,
        persist: impl FnOnce() -> Result<()>,
    ) -> Result<Option<Encoding>> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("gallery lock poisoned"))?;
        check_compatible(&entries, subject_name, &encoding)?;
        persist()?;
        Ok(entries.insert(subject_name.to_string(), encoding))
    }

    /// Swaps in a freshly loaded set of entries in one step.
    ///
    /// Entries whose length disagrees with those before them are dropped.
    pub fn replace_all(&self, fresh: Vec<GalleryEntry>) -> Result<()> {
        let mut loaded = BTreeMap::new();
        for entry in fresh {
            match check_compatible(&loaded, &entry.subject_name, &entry.encoding) {
                Ok(()) => {
                    loaded.insert(entry.subject_name, entry.encoding);
                }
                Err(err) => log::warn!("gallery: skipping reference: {}", err),
            }
        }
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("gallery lock poisoned"))?;
        *entries = loaded;
        Ok(())
    }

    /// Shared read access; matching holds this for the duration of one probe.
    pub fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, Encoding>>> {
        self.entries
            .read()
            .map_err(|_| anyhow!("gallery lock poisoned"))
    }

    pub fn get(&self, subject_name: &str) -> Result<Option<Encoding>> {
        Ok(self.read()?.get(subject_name).cloned())
    }

    pub fn names(&self) -> Result<Vec<String>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }
}

fn check_compatible(
    entries: &BTreeMap<String, Encoding>,
    subject_name: &str,
    encoding: &Encoding,
) -> Result<()> {
    if encoding.is_empty() {
        return Err(anyhow!("refusing empty encoding for '{}'", subject_name));
    }
    if let Some((other, existing)) = entries
        .iter()
        .find(|(name, existing)| name.as_str() != subject_name && existing.len() != encoding.len())
    {
        return Err(anyhow!(
            "encoding length {} for '{}' does not match gallery length {} ('{}')",
            encoding.len(),
            subject_name,
            existing.len(),
            other
        ));
    }
    Ok(())
}

/// Canonical form of a subject name.
///
/// File names store spaces as `_`, so `_` is read as a space everywhere
/// and runs of whitespace collapse to one space.
pub fn canonical_name(subject_name: &str) -> String {
    subject_name
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Known-faces directory backing the gallery.
///
/// One reference image per subject, named `<Name_With_Underscores>.jpg`.
#[derive(Clone, Debug)]
pub struct GalleryStore {
    dir: PathBuf,
}

impl GalleryStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create known faces dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the reference image for `subject_name`, replacing any previous one.
    pub fn save(&self, subject_name: &str, image: &[u8]) -> Result<PathBuf> {
        let path = self.dir.join(file_name_for(subject_name)?);
        std::fs::write(&path, image)
            .with_context(|| format!("write reference image {}", path.display()))?;
        Ok(path)
    }

    /// Encodes every reference image in the directory, one entry per
    /// subject, ordered by name.
    ///
    /// Unreadable files and images without a detectable face are skipped.
    pub fn load(&self, encoder: &dyn FaceEncoder) -> Result<Vec<GalleryEntry>> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("read known faces dir {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() && has_image_extension(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut loaded = BTreeMap::new();
        for path in paths {
            let Some(name) = subject_name_for(&path) else {
                continue;
            };
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    log::warn!("gallery: skipping {}: {}", path.display(), err);
                    continue;
                }
            };
            match encoder.encode(&bytes) {
                Ok(Some(encoding)) => {
                    if loaded.insert(name.clone(), encoding).is_some() {
                        log::warn!(
                            "gallery: {} replaces an earlier image for '{}'",
                            path.display(),
                            name
                        );
                    }
                }
                Ok(None) => log::warn!("gallery: no face found in {}", path.display()),
                Err(err) => log::warn!("gallery: failed to encode {}: {}", path.display(), err),
            }
        }
        Ok(loaded
            .into_iter()
            .map(|(subject_name, encoding)| GalleryEntry {
                subject_name,
                encoding,
            })
            .collect())
    }
}

fn file_name_for(subject_name: &str) -> Result<String> {
    let name = canonical_name(subject_name);
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(anyhow!("invalid subject name '{}'", subject_name));
    }
    Ok(format!("{}.jpg", name.replace(' ', "_")))
}

fn subject_name_for(path: &Path) -> Option<String> {
    let name = canonical_name(path.file_stem()?.to_str()?);
    (!name.is_empty()).then_some(name)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
