//! Content-keyed cache of decoded textures over a directory of encoded
//! images.
//!
//! The store is the sole owner of texture lifetime: uploads enter through
//! [`TextureStore::process_and_load`], lookups go through
//! [`TextureStore::load`], and handles live until explicitly evicted.
//! Concurrent loads for one uncached key share a single fetch+decode
//! through a per-key in-flight table.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use image::RgbaImage;
use tokio::sync::OnceCell;

use deck_error::{DeckError, Result};
use fs_atomic::write_atomic;
use image_pipeline::NormalizedImage;
use texture_key::TextureKey;

mod defaults;

/// Reserved key resolving to the synthesized front placeholder.
pub const DEFAULT_FRONT_KEY: &str = "default.front";

/// Reserved key resolving to the synthesized back placeholder.
pub const DEFAULT_BACK_KEY: &str = "default.back";

/// A decoded texture held by the store until evicted.
///
/// The sampling policy is fixed at construction so behavior is identical
/// regardless of where the asset came from.
#[derive(Debug)]
pub struct Texture {
    pub key: String,
    pub width: u32,
    pub height: u32,
    pub pixels: RgbaImage,
    pub flip_y: bool,
    pub linear_filter: bool,
    pub generate_mipmaps: bool,
}

impl Texture {
    fn new(key: String, pixels: RgbaImage) -> Self {
        Self {
            width: pixels.width(),
            height: pixels.height(),
            key,
            pixels,
            flip_y: false,
            linear_filter: true,
            generate_mipmaps: false,
        }
    }
}

/// A validated, normalized upload together with its cached handle.
#[derive(Debug)]
pub struct ProcessedImage {
    pub key: TextureKey,
    pub texture: Arc<Texture>,
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: f32,
    pub encoded: Vec<u8>,
}

/// Cache effectiveness counters. A miss is a request that performed the
/// expensive work (disk fetch + decode, or upload normalization).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
}

type InFlight = Arc<OnceCell<std::result::Result<Arc<Texture>, String>>>;

pub struct TextureStore {
    /// Label for logging
    label: String,
    /// Directory holding encoded images, one file per key
    root: PathBuf,
    /// Resident decoded handles
    loaded: Mutex<HashMap<String, Arc<Texture>>>,
    /// One cell per key currently being fetched; concurrent callers for
    /// the same key await the same cell
    pending: Mutex<HashMap<String, InFlight>>,
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TextureStore {
    /// Opens a store over `root`, creating the directory if needed.
    pub fn new(label: String, root: &Path) -> Result<Self> {
        fs::create_dir_all(root).map_err(|err| {
            DeckError::Persistence(
                label.clone(),
                format!("cannot create {}: {}", root.display(), err),
            )
        })?;

        log::debug!(
            "textures/{}: initialized over {}",
            label,
            root.display()
        );

        Ok(Self {
            label,
            root: PathBuf::from(root),
            loaded: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            requests: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Resolves a key to its texture handle.
    ///
    /// A resident hit returns the identical handle with no I/O. On a miss
    /// the encoded bytes are read from the store directory and decoded;
    /// failures leave the cache untouched. Reserved placeholder keys are
    /// synthesized instead of read.
    pub async fn load(&self, key: &str) -> Result<Arc<Texture>> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        if key == DEFAULT_FRONT_KEY || key == DEFAULT_BACK_KEY {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(self.default_texture(key));
        }

        if let Some(texture) = self.loaded.lock().unwrap().get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::debug!("textures/{}: cache hit for key {}", self.label, key);
            return Ok(texture.clone());
        }

        // No await between the residency check and taking the cell, so a
        // burst of callers for one key all land on the same cell.
        let cell: InFlight = {
            let mut pending = self.pending.lock().unwrap();
            pending.entry(key.to_owned()).or_default().clone()
        };

        let outcome = cell
            .get_or_init(|| self.fetch_and_decode(key))
            .await
            .clone();

        // Every waiter settles the entry; both steps are idempotent.
        match outcome {
            Ok(texture) => {
                let cached = self
                    .loaded
                    .lock()
                    .unwrap()
                    .entry(key.to_owned())
                    .or_insert_with(|| texture)
                    .clone();
                self.pending.lock().unwrap().remove(key);
                Ok(cached)
            }
            Err(message) => {
                self.pending.lock().unwrap().remove(key);
                Err(DeckError::AssetLoad(key.to_owned(), message))
            }
        }
    }

    async fn fetch_and_decode(
        &self,
        key: &str,
    ) -> std::result::Result<Arc<Texture>, String> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "textures/{}: loading key {} from disk",
            self.label,
            key
        );

        let path = match self.storage_path(key) {
            Some(path) => path,
            None => return Err("key does not name a stored texture".to_owned()),
        };

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|err| format!("read {}: {}", path.display(), err))?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|err| format!("decode: {}", err))?;

        Ok(Arc::new(Texture::new(key.to_owned(), decoded.to_rgba8())))
    }

    /// Validates, normalizes and caches an upload.
    ///
    /// The content key is derived before any decode, so re-uploading the
    /// same bytes returns the existing entry without doing the expensive
    /// work again.
    pub async fn process_and_load(&self, bytes: &[u8]) -> Result<ProcessedImage> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        image_pipeline::validate_upload(bytes)
            .map_err(|err| DeckError::Processing(err.to_string()))?;

        let key = TextureKey::from_bytes(bytes);

        let resident = self.loaded.lock().unwrap().get(key.as_str()).cloned();
        if let Some(texture) = resident {
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "textures/{}: upload already cached under {}",
                self.label,
                key
            );
            let encoded = tokio::fs::read(self.root.join(key.as_str()))
                .await
                .map_err(|err| {
                    DeckError::Persistence(self.label.clone(), err.to_string())
                })?;
            return Ok(ProcessedImage {
                width: texture.width,
                height: texture.height,
                aspect_ratio: texture.width as f32 / texture.height as f32,
                key,
                texture,
                encoded,
            });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let NormalizedImage {
            width,
            height,
            aspect_ratio,
            encoded,
            bitmap,
        } = image_pipeline::normalize(bytes)
            .map_err(|err| DeckError::Processing(err.to_string()))?;

        write_atomic(self.root.join(key.as_str()), &encoded).map_err(|err| {
            DeckError::Persistence(
                self.label.clone(),
                format!("store {}: {}", key, err),
            )
        })?;

        let texture = self
            .loaded
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Texture::new(key.to_string(), bitmap))
            })
            .clone();

        log::debug!(
            "textures/{}: processed upload into key {} ({}x{})",
            self.label,
            key,
            width,
            height
        );

        Ok(ProcessedImage {
            key,
            texture,
            width,
            height,
            aspect_ratio,
            encoded,
        })
    }

    /// Placeholder shown for cards without custom artwork.
    /// Pure synthesis, cached under a reserved key.
    pub fn default_front(&self) -> Arc<Texture> {
        self.default_texture(DEFAULT_FRONT_KEY)
    }

    /// Placeholder for the shared card back.
    pub fn default_back(&self) -> Arc<Texture> {
        self.default_texture(DEFAULT_BACK_KEY)
    }

    fn default_texture(&self, key: &str) -> Arc<Texture> {
        self.loaded
            .lock()
            .unwrap()
            .entry(key.to_owned())
            .or_insert_with(|| {
                log::debug!(
                    "textures/{}: synthesizing placeholder {}",
                    self.label,
                    key
                );
                let bitmap = if key == DEFAULT_FRONT_KEY {
                    defaults::front_bitmap()
                } else {
                    defaults::back_bitmap()
                };
                Arc::new(Texture::new(key.to_owned(), bitmap))
            })
            .clone()
    }

    /// Drops the resident handle and deletes the stored bytes.
    /// No-op if the key is absent.
    pub fn remove(&self, key: &str) {
        if self.loaded.lock().unwrap().remove(key).is_some() {
            log::debug!("textures/{}: evicted key {}", self.label, key);
        }
        if let Some(path) = self.storage_path(key) {
            if path.exists() {
                if let Err(err) = fs::remove_file(&path) {
                    log::error!(
                        "textures/{}: failed to delete stored bytes for {}: {}",
                        self.label,
                        key,
                        err
                    );
                }
            }
        }
    }

    /// Drops every resident handle and in-flight entry. The on-disk
    /// artwork store survives the process.
    pub fn clear(&self) {
        let mut loaded = self.loaded.lock().unwrap();
        log::debug!(
            "textures/{}: clearing {} resident textures",
            self.label,
            loaded.len()
        );
        loaded.clear();
        self.pending.lock().unwrap().clear();
    }

    /// Whether a handle for `key` is resident.
    pub fn contains(&self, key: &str) -> bool {
        self.loaded.lock().unwrap().contains_key(key)
    }

    /// Number of resident handles.
    pub fn resident(&self) -> usize {
        self.loaded.lock().unwrap().len()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            requests: self.requests.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Keys may not escape the store directory.
    fn storage_path(&self, key: &str) -> Option<PathBuf> {
        let valid = !key.is_empty()
            && key != "."
            && key != ".."
            && !key.contains('/')
            && !key.contains('\\');
        if !valid {
            return None;
        }
        Some(self.root.join(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempdir::TempDir;

    fn sample_upload(width: u32, height: u32, seed: u8) -> Vec<u8> {
        let bitmap = RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([(x % 256) as u8, (y % 256) as u8, seed, 255])
        });
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(bitmap)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn create_store(dir: &TempDir) -> TextureStore {
        TextureStore::new("test".to_string(), dir.path())
            .expect("Failed to create store")
    }

    #[tokio::test]
    async fn upload_then_load_returns_the_cached_handle() {
        let dir = TempDir::new("textures").unwrap();
        let store = create_store(&dir);

        let processed = store
            .process_and_load(&sample_upload(64, 112, 1))
            .await
            .unwrap();
        let loaded = store.load(processed.key.as_str()).await.unwrap();

        assert!(Arc::ptr_eq(&processed.texture, &loaded));
        assert_eq!(store.resident(), 1);
        assert_eq!(store.stats().hits, 1);
    }

    #[tokio::test]
    async fn large_uploads_are_bounded() {
        let dir = TempDir::new("textures").unwrap();
        let store = create_store(&dir);

        let bytes = sample_upload(2000, 3500, 2);
        let processed = store.process_and_load(&bytes).await.unwrap();

        assert!(processed.width <= 1024 && processed.height <= 1024);
        assert_eq!(processed.height, 1024);
        assert!(store.contains(processed.key.as_str()));
        assert!(dir.path().join(processed.key.as_str()).exists());
    }

    #[tokio::test]
    async fn unknown_key_fails_and_is_not_inserted() {
        let dir = TempDir::new("textures").unwrap();
        let store = create_store(&dir);

        let result = store.load("unreachable-url").await;
        assert!(matches!(result, Err(DeckError::AssetLoad(_, _))));
        assert_eq!(store.resident(), 0);
        assert!(!store.contains("unreachable-url"));
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_store_directory() {
        let dir = TempDir::new("textures").unwrap();
        let store = create_store(&dir);

        let result = store.load("../outside").await;
        assert!(matches!(result, Err(DeckError::AssetLoad(_, _))));
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_fetch() {
        let dir = TempDir::new("textures").unwrap();
        let store = create_store(&dir);

        let processed = store
            .process_and_load(&sample_upload(64, 112, 3))
            .await
            .unwrap();
        let key = processed.key.to_string();
        drop(processed);
        store.clear();
        let before = store.stats().misses;

        let (first, second) = tokio::join!(store.load(&key), store.load(&key));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.stats().misses, before + 1);
    }

    #[tokio::test]
    async fn identical_uploads_reuse_the_entry() {
        let dir = TempDir::new("textures").unwrap();
        let store = create_store(&dir);

        let bytes = sample_upload(64, 112, 4);
        let first = store.process_and_load(&bytes).await.unwrap();
        let second = store.process_and_load(&bytes).await.unwrap();

        assert_eq!(first.key, second.key);
        assert!(Arc::ptr_eq(&first.texture, &second.texture));
        assert_eq!(first.encoded, second.encoded);
        assert_eq!(store.resident(), 1);
        // The second call is a pure hit; no second normalization ran.
        assert_eq!(store.stats().misses, 1);
        assert_eq!(store.stats().hits, 1);
    }

    #[tokio::test]
    async fn remove_evicts_handle_and_stored_bytes() {
        let dir = TempDir::new("textures").unwrap();
        let store = create_store(&dir);

        let processed = store
            .process_and_load(&sample_upload(64, 112, 5))
            .await
            .unwrap();
        let key = processed.key.to_string();

        store.remove(&key);
        assert!(!store.contains(&key));
        assert!(!dir.path().join(&key).exists());
        assert!(store.load(&key).await.is_err());

        // Absent keys are a no-op.
        store.remove(&key);
    }

    #[tokio::test]
    async fn invalid_uploads_are_wrapped_as_processing_errors() {
        let dir = TempDir::new("textures").unwrap();
        let store = create_store(&dir);

        let result = store.process_and_load(b"not an image").await;
        assert!(matches!(result, Err(DeckError::Processing(_))));
        assert_eq!(store.resident(), 0);
    }

    #[tokio::test]
    async fn default_textures_are_synthesized_once() {
        let dir = TempDir::new("textures").unwrap();
        let store = create_store(&dir);

        let front = store.default_front();
        assert_eq!((front.width, front.height), (512, 896));
        assert!(Arc::ptr_eq(&front, &store.default_front()));

        let back = store.default_back();
        assert!(!Arc::ptr_eq(&front, &back));

        // The reserved key resolves through the ordinary lookup path.
        let via_load = store.load(DEFAULT_FRONT_KEY).await.unwrap();
        assert!(Arc::ptr_eq(&front, &via_load));
    }

    #[tokio::test]
    async fn clear_drops_residents_but_keeps_stored_bytes() {
        let dir = TempDir::new("textures").unwrap();
        let store = create_store(&dir);

        let processed = store
            .process_and_load(&sample_upload(64, 112, 6))
            .await
            .unwrap();
        let key = processed.key.to_string();

        store.clear();
        assert_eq!(store.resident(), 0);
        assert!(dir.path().join(&key).exists());

        // A reload rebuilds the handle from the stored bytes.
        let reloaded = store.load(&key).await.unwrap();
        assert_eq!((reloaded.width, reloaded.height), (64, 112));
    }
}
