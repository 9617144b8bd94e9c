//! Resume positions stored with the media file itself.
//!
//! Values are whole milliseconds as decimal ASCII. Saving and loading are best
//! effort: [`PositionManager`] logs failures and never lets them reach playback.

use std::path::Path;

use anyhow::{Context, Result};
use lofty::{AudioFile, ItemKey, Tag, TaggedFileExt, read_from_path};

use crate::config::PositionBackend;

/// Extended attribute holding the position.
pub const XATTR_NAME: &str = "user.playback-engine.position";

/// Tag item holding the position.
pub const TAG_KEY: &str = "PLAYBACK_ENGINE_POSITION";

/// Storage for resume positions.
pub trait PositionStore: Send {
    fn save(&self, path: &Path, ms: u64) -> Result<()>;
    /// `Ok(None)` when the file has no stored position.
    fn load(&self, path: &Path) -> Result<Option<u64>>;
}

/// Extended attribute on the media file.
pub struct XattrStore;

impl PositionStore for XattrStore {
    fn save(&self, path: &Path, ms: u64) -> Result<()> {
        xattr::set(path, XATTR_NAME, ms.to_string().as_bytes())
            .with_context(|| format!("set {XATTR_NAME} on {:?}", path))
    }

    fn load(&self, path: &Path) -> Result<Option<u64>> {
        let raw = xattr::get(path, XATTR_NAME)
            .with_context(|| format!("get {XATTR_NAME} on {:?}", path))?;
        Ok(raw.map(|bytes| parse_position(&String::from_utf8_lossy(&bytes))))
    }
}

/// Custom text item in the file's primary tag.
pub struct TagStore;

impl PositionStore for TagStore {
    fn save(&self, path: &Path, ms: u64) -> Result<()> {
        let mut tagged_file = read_from_path(path).context("read tags")?;
        let tag_type = tagged_file.primary_tag_type();
        if tagged_file.tag(tag_type).is_none() {
            tagged_file.insert_tag(Tag::new(tag_type));
        }
        let tag = tagged_file
            .tag_mut(tag_type)
            .context("create tag container")?;
        tag.insert_text(ItemKey::Unknown(TAG_KEY.to_string()), ms.to_string());
        tagged_file.save_to_path(path).context("write tags")?;
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<Option<u64>> {
        let tagged_file = read_from_path(path).context("read tags")?;
        let key = ItemKey::Unknown(TAG_KEY.to_string());
        Ok(tagged_file
            .tags()
            .iter()
            .find_map(|tag| tag.get_string(&key))
            .map(parse_position))
    }
}

/// Persistence disabled.
pub struct NoStore;

impl PositionStore for NoStore {
    fn save(&self, _path: &Path, _ms: u64) -> Result<()> {
        Ok(())
    }

    fn load(&self, _path: &Path) -> Result<Option<u64>> {
        Ok(None)
    }
}

/// Unsigned decimal with surrounding whitespace tolerated; anything else is 0.
pub fn parse_position(raw: &str) -> u64 {
    raw.trim().parse().unwrap_or(0)
}

pub(crate) fn store_for(backend: PositionBackend) -> Box<dyn PositionStore> {
    match backend {
        PositionBackend::Xattr => Box::new(XattrStore),
        PositionBackend::Tags => Box::new(TagStore),
        PositionBackend::None => Box::new(NoStore),
    }
}

/// Best-effort wrapper around a [`PositionStore`].
pub(crate) struct PositionManager {
    store: Box<dyn PositionStore>,
}

impl PositionManager {
    pub(crate) fn new(store: Box<dyn PositionStore>) -> Self {
        Self { store }
    }

    pub(crate) fn save(&self, path: &Path, ms: u64) {
        match self.store.save(path, ms) {
            Ok(()) => tracing::info!(path = ?path, position_ms = ms, "saved position"),
            Err(e) => tracing::warn!(path = ?path, error = %format!("{e:#}"), "saving position failed"),
        }
    }

    /// Stored position, or 0 when there is none or it cannot be read.
    pub(crate) fn load(&self, path: &Path) -> u64 {
        match self.store.load(path) {
            Ok(Some(ms)) => {
                tracing::debug!(path = ?path, position_ms = ms, "loaded position");
                ms
            }
            Ok(None) => 0,
            Err(e) => {
                tracing::debug!(path = ?path, error = %format!("{e:#}"), "no stored position");
                0
            }
        }
    }
}
