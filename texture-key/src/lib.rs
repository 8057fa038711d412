use core::{fmt::Display, str::FromStr};
use std::convert::Infallible;

use blake3::Hasher;
use hex::encode;
use serde::{Deserialize, Serialize};

/// Content-addressed key for a stored texture.
///
/// Wraps the lowercase-hex BLAKE3 digest of the uploaded source bytes, so
/// identical uploads always map to the same key. Computed with [`blake3`]
/// before any decode; maps that reference textures store the key as a
/// plain string, which also lets them carry keys that never resolve.
#[derive(
    Debug, Clone, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct TextureKey(pub String);

impl TextureKey {
    /// Derives the key from raw upload bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        log::debug!("Computing BLAKE3 key for {} bytes", bytes.len());

        let mut hasher = Hasher::new();
        hasher.update(bytes);
        let hash = hasher.finalize();
        TextureKey(encode(hash.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TextureKey {
    type Err = Infallible;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        Ok(TextureKey(s.to_string()))
    }
}

impl Display for TextureKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanity_check() {
        let key = TextureKey::from_bytes(b"");
        assert_eq!(
            key,
            TextureKey(
                "af1349b9f5f9a1a6a0404dee36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
                    .to_string()
            )
        );
    }

    #[test]
    fn identical_bytes_share_a_key() {
        let data = vec![7u8; 4096];
        assert_eq!(
            TextureKey::from_bytes(&data),
            TextureKey::from_bytes(&data.clone())
        );
        assert_ne!(
            TextureKey::from_bytes(&data),
            TextureKey::from_bytes(&data[..4095])
        );
    }

    #[test]
    fn string_round_trip() {
        let key = TextureKey::from_bytes(b"the fool");
        let parsed: TextureKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
    }
}
