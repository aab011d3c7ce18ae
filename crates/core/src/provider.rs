//! Provider families the engine can dispatch to.
//!
//! Each kind maps to exactly one adapter and one engine instance. The
//! numeric discriminant is the value persisted in `jobs.provider_kind`.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A third-party generation provider family.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// DALL·E-style image generation behind an async relay.
    ImageA = 1,
    /// Midjourney proxy.
    ImageB = 2,
    /// Stable Diffusion task API.
    ImageC = 3,
    /// Suno-style music generation.
    Music = 4,
    /// Luma-style video generation.
    Video = 5,
}

impl ProviderKind {
    /// Every provider kind, in discriminant order.
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::ImageA,
        ProviderKind::ImageB,
        ProviderKind::ImageC,
        ProviderKind::Music,
        ProviderKind::Video,
    ];

    /// Return the database id.
    pub fn id(self) -> i16 {
        self as i16
    }

    /// Resolve a database id back into a kind.
    pub fn from_id(id: i16) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|k| k.id() == id)
            .ok_or_else(|| CoreError::Validation(format!("Unknown provider kind id {id}")))
    }

    /// Canonical lowercase name used in config and URLs.
    pub fn name(self) -> &'static str {
        match self {
            Self::ImageA => "image_a",
            Self::ImageB => "image_b",
            Self::ImageC => "image_c",
            Self::Music => "music",
            Self::Video => "video",
        }
    }

    /// Parse the canonical name. Hyphens are accepted in place of
    /// underscores so URL segments like `image-a` resolve too.
    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|k| k.name() == normalized)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unknown provider '{name}'. Must be one of: image_a, image_b, image_c, music, video"
                ))
            })
    }

    /// Environment variable prefix for this provider's settings.
    pub fn env_prefix(self) -> &'static str {
        match self {
            Self::ImageA => "IMAGE_A",
            Self::ImageB => "IMAGE_B",
            Self::ImageC => "IMAGE_C",
            Self::Music => "MUSIC",
            Self::Video => "VIDEO",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
