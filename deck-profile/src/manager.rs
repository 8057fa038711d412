use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use deck_error::{DeckError, Result};
use fs_atomic::write_atomic;
use texture_store::{Texture, TextureStore};

use crate::profile::{
    DeckProfile, DeckProfileDraft, DeckProfileState, ProfileEvent, ProfileId,
    ProfilePatch,
};

const STORAGE_VERSION: i32 = 1;
const EVENT_CAPACITY: usize = 32;

/// On-disk shape of the record: the state plus a format version checked
/// on read.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredState {
    version: i32,
    #[serde(flatten)]
    state: DeckProfileState,
}

/// Owner of the persisted profile collection and the active profile.
///
/// Every operation that introduces texture references preloads them
/// through the store all-or-nothing: either every referenced key is
/// resident when the mutation commits, or nothing changes. The whole
/// state is written through on every successful mutation; a persistence
/// failure is logged and the in-memory change stands.
pub struct DeckProfileManager {
    /// Label for logging
    label: String,
    /// Path of the persisted record
    path: PathBuf,
    textures: Arc<TextureStore>,
    state: Mutex<DeckProfileState>,
    /// Ticket counter serializing active-profile transitions; a
    /// completion holding a stale ticket is discarded
    generation: AtomicU64,
    /// Times `card_texture` degraded to the default artwork
    fallbacks: AtomicU64,
    events: broadcast::Sender<ProfileEvent>,
}

impl DeckProfileManager {
    /// Opens a manager over the record at `path`, loading it eagerly.
    /// A missing or damaged record yields the empty state; startup never
    /// fails on bad data.
    pub fn new(label: String, path: &Path, textures: Arc<TextureStore>) -> Self {
        let state = Self::read_fs(&label, path);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            label,
            path: PathBuf::from(path),
            textures,
            state: Mutex::new(state),
            generation: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            events,
        }
    }

    fn read_fs(label: &str, path: &Path) -> DeckProfileState {
        if !path.exists() {
            log::debug!(
                "profiles/{}: no record at {}, starting empty",
                label,
                path.display()
            );
            return DeckProfileState::default();
        }

        let stored = fs::read(path)
            .map_err(DeckError::from)
            .and_then(|bytes| {
                serde_json::from_slice::<StoredState>(&bytes)
                    .map_err(DeckError::from)
            });

        match stored {
            Ok(stored) if stored.version == STORAGE_VERSION => {
                let mut state = stored.state;
                // The active id must name a stored profile.
                if let Some(active) = state.active_profile_id.clone() {
                    if !state.profiles.contains_key(&active) {
                        log::warn!(
                            "profiles/{}: active id {} missing from record, resetting",
                            label,
                            active
                        );
                        state.active_profile_id = None;
                    }
                }
                log::debug!(
                    "profiles/{}: loaded {} profiles",
                    label,
                    state.profiles.len()
                );
                state
            }
            Ok(stored) => {
                log::warn!(
                    "profiles/{}: record version {} unsupported (expected {}), starting empty",
                    label,
                    stored.version,
                    STORAGE_VERSION
                );
                DeckProfileState::default()
            }
            Err(err) => {
                log::warn!(
                    "profiles/{}: failed to load record: {}, starting empty",
                    label,
                    err
                );
                DeckProfileState::default()
            }
        }
    }

    /// Write-through of the whole record. Availability over durability:
    /// a failure here is logged and the in-memory state stands.
    fn write_fs(&self, state: &DeckProfileState) {
        let record = StoredState {
            version: STORAGE_VERSION,
            state: state.clone(),
        };
        let written = serde_json::to_vec(&record)
            .map_err(|err| {
                DeckError::Persistence(self.label.clone(), err.to_string())
            })
            .and_then(|bytes| write_atomic(&self.path, &bytes));

        if let Err(err) = written {
            log::error!(
                "profiles/{}: failed to persist record: {}",
                self.label,
                err
            );
        }
    }

    fn emit(&self, event: ProfileEvent) {
        // Nobody subscribed is fine.
        let _ = self.events.send(event);
    }

    /// Typed notification stream; one receiver per subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<ProfileEvent> {
        self.events.subscribe()
    }

    /// Loads every key in order; the first failure aborts the batch.
    async fn preload(&self, keys: BTreeSet<String>) -> Result<()> {
        for key in keys {
            self.textures.load(&key).await?;
        }
        Ok(())
    }

    /// Creates a profile from a draft, preloading every referenced
    /// texture all-or-nothing. Nothing is stored on failure.
    pub async fn create_profile(
        &self,
        draft: DeckProfileDraft,
    ) -> Result<ProfileId> {
        let keys: BTreeSet<String> =
            draft.card_textures.values().cloned().collect();
        self.preload(keys).await?;

        let id = Uuid::new_v4().to_string();
        let now = now_millis();
        let profile = DeckProfile {
            id: id.clone(),
            name: draft.name,
            creator: draft.creator,
            created_at: now,
            updated_at: now,
            card_textures: draft.card_textures,
            metadata: draft.metadata,
        };

        {
            let mut state = self.state.lock().unwrap();
            state.profiles.insert(id.clone(), profile.clone());
            self.write_fs(&state);
        }

        log::debug!("profiles/{}: created profile {}", self.label, id);
        self.emit(ProfileEvent::Created(profile));
        Ok(id)
    }

    /// Merges a patch into an existing profile. Keys newly referenced by
    /// the patch are preloaded all-or-nothing; failure leaves the profile
    /// exactly as it was.
    pub async fn update_profile(
        &self,
        id: &str,
        patch: ProfilePatch,
    ) -> Result<()> {
        let current = self
            .state
            .lock()
            .unwrap()
            .profiles
            .get(id)
            .cloned()
            .ok_or_else(|| DeckError::NotFound(id.to_owned()))?;

        if let Some(next_textures) = &patch.card_textures {
            let referenced: BTreeSet<&String> =
                current.card_textures.values().collect();
            let fresh: BTreeSet<String> = next_textures
                .values()
                .filter(|key| !referenced.contains(key))
                .cloned()
                .collect();
            self.preload(fresh).await?;
        }

        let updated = {
            let mut state = self.state.lock().unwrap();
            let updated = {
                // The profile may have been deleted while we awaited.
                let profile = state
                    .profiles
                    .get_mut(id)
                    .ok_or_else(|| DeckError::NotFound(id.to_owned()))?;
                if let Some(name) = patch.name {
                    profile.name = name;
                }
                if let Some(creator) = patch.creator {
                    profile.creator = creator;
                }
                if let Some(card_textures) = patch.card_textures {
                    profile.card_textures = card_textures;
                }
                if let Some(metadata) = patch.metadata {
                    profile.metadata = Some(metadata);
                }
                profile.updated_at = strictly_after(profile.updated_at);
                profile.clone()
            };
            self.write_fs(&state);
            updated
        };

        log::debug!("profiles/{}: updated profile {}", self.label, id);
        self.emit(ProfileEvent::Updated(updated));
        Ok(())
    }

    /// Removes a profile, clearing the active id if it pointed here.
    /// Only textures referenced by no surviving profile are evicted.
    pub fn delete_profile(&self, id: &str) -> Result<()> {
        let orphaned = {
            let mut state = self.state.lock().unwrap();
            let removed = state
                .profiles
                .remove(id)
                .ok_or_else(|| DeckError::NotFound(id.to_owned()))?;
            if state.active_profile_id.as_deref() == Some(id) {
                state.active_profile_id = None;
            }

            let still_referenced: BTreeSet<&String> = state
                .profiles
                .values()
                .flat_map(|profile| profile.card_textures.values())
                .collect();
            let orphaned: BTreeSet<String> = removed
                .card_textures
                .into_values()
                .filter(|key| !still_referenced.contains(key))
                .collect();

            self.write_fs(&state);
            orphaned
        };

        for key in &orphaned {
            self.textures.remove(key);
        }

        log::debug!(
            "profiles/{}: deleted profile {} ({} textures evicted)",
            self.label,
            id,
            orphaned.len()
        );
        self.emit(ProfileEvent::Deleted(id.to_owned()));
        Ok(())
    }

    /// Activates a profile, or deactivates with `None`.
    ///
    /// Activation preloads every referenced texture all-or-nothing, so a
    /// consumer can never observe a half-loaded active deck. Overlapping
    /// transitions are serialized by ticket: a completion that is no
    /// longer the newest returns `Ok(false)` without touching state.
    pub async fn set_active_profile(&self, id: Option<&str>) -> Result<bool> {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let id = match id {
            None => {
                {
                    let mut state = self.state.lock().unwrap();
                    state.active_profile_id = None;
                    self.write_fs(&state);
                }
                log::debug!("profiles/{}: deactivated", self.label);
                self.emit(ProfileEvent::ActiveChanged(None));
                return Ok(true);
            }
            Some(id) => id,
        };

        let keys: BTreeSet<String> = {
            let state = self.state.lock().unwrap();
            let profile = state
                .profiles
                .get(id)
                .ok_or_else(|| DeckError::NotFound(id.to_owned()))?;
            profile.card_textures.values().cloned().collect()
        };

        self.preload(keys).await?;

        if self.generation.load(Ordering::SeqCst) != ticket {
            log::debug!(
                "profiles/{}: activation of {} superseded",
                self.label,
                id
            );
            return Ok(false);
        }

        {
            let mut state = self.state.lock().unwrap();
            if !state.profiles.contains_key(id) {
                return Err(DeckError::NotFound(id.to_owned()));
            }
            state.active_profile_id = Some(id.to_owned());
            self.write_fs(&state);
        }

        log::debug!("profiles/{}: profile {} is now active", self.label, id);
        self.emit(ProfileEvent::ActiveChanged(Some(id.to_owned())));
        Ok(true)
    }

    /// Resolves the artwork for a card. Never fails: an unmapped card,
    /// a missing active profile, or a reload failure all degrade to the
    /// default front texture and bump the fallback counter.
    pub async fn card_texture(&self, card_id: &str) -> Arc<Texture> {
        let mapped = {
            let state = self.state.lock().unwrap();
            state
                .active_profile_id
                .as_ref()
                .and_then(|id| state.profiles.get(id))
                .and_then(|profile| profile.card_textures.get(card_id))
                .cloned()
        };

        let key = match mapped {
            Some(key) => key,
            None => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "profiles/{}: no artwork mapped for card {}, using default",
                    self.label,
                    card_id
                );
                return self.textures.default_front();
            }
        };

        match self.textures.load(&key).await {
            Ok(texture) => texture,
            Err(err) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "profiles/{}: failed to resolve artwork for card {}: {}",
                    self.label,
                    card_id,
                    err
                );
                self.textures.default_front()
            }
        }
    }

    /// Number of times `card_texture` fell back to the default artwork.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    pub fn profiles(&self) -> Vec<DeckProfile> {
        self.state
            .lock()
            .unwrap()
            .profiles
            .values()
            .cloned()
            .collect()
    }

    pub fn profile(&self, id: &str) -> Option<DeckProfile> {
        self.state.lock().unwrap().profiles.get(id).cloned()
    }

    pub fn active_profile_id(&self) -> Option<ProfileId> {
        self.state.lock().unwrap().active_profile_id.clone()
    }

    pub fn active_profile(&self) -> Option<DeckProfile> {
        let state = self.state.lock().unwrap();
        state
            .active_profile_id
            .as_ref()
            .and_then(|id| state.profiles.get(id))
            .cloned()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Timestamps must strictly increase even within one clock tick.
fn strictly_after(previous: u64) -> u64 {
    now_millis().max(previous + 1)
}
