use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type ProfileId = String;

/// Free-form descriptive fields attached to a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// A named, user-authored mapping from card identifiers to texture keys.
///
/// Ids are assigned at creation and never change; `updated_at` strictly
/// increases on every successful mutation. Field names stay camelCase on
/// disk for compatibility with previously exported records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckProfile {
    pub id: ProfileId,
    pub name: String,
    pub creator: String,
    pub created_at: u64,
    pub updated_at: u64,
    pub card_textures: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ProfileMetadata>,
}

/// Caller-supplied fields of a new profile; id and timestamps are
/// assigned by the manager.
#[derive(Debug, Clone, Default)]
pub struct DeckProfileDraft {
    pub name: String,
    pub creator: String,
    pub card_textures: BTreeMap<String, String>,
    pub metadata: Option<ProfileMetadata>,
}

/// Partial update. `None` fields keep their current value;
/// `card_textures` replaces the whole mapping when present.
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub creator: Option<String>,
    pub card_textures: Option<BTreeMap<String, String>>,
    pub metadata: Option<ProfileMetadata>,
}

/// The full persisted unit. The active id, when set, always names an
/// entry of `profiles`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckProfileState {
    pub active_profile_id: Option<ProfileId>,
    pub profiles: BTreeMap<ProfileId, DeckProfile>,
}

/// Typed notifications for the UI layer.
#[derive(Debug, Clone)]
pub enum ProfileEvent {
    Created(DeckProfile),
    Updated(DeckProfile),
    Deleted(ProfileId),
    ActiveChanged(Option<ProfileId>),
}
