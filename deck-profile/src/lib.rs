pub mod manager;
pub mod profile;

pub use manager::DeckProfileManager;
pub use profile::{
    DeckProfile, DeckProfileDraft, DeckProfileState, ProfileEvent, ProfileId,
    ProfileMetadata, ProfilePatch,
};

/// Conventional name of the persisted profile record inside a deck data
/// directory.
pub const PROFILES_FILE: &str = "profiles.json";
