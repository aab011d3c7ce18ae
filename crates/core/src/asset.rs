//! Asset references attached to succeeded and completed jobs.

use serde::{Deserialize, Serialize};

/// Where a generated artifact lives.
///
/// Succeeded jobs carry `Remote` references straight from the provider;
/// the retriever swaps them for `Local` references once the bytes are
/// in durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "location", rename_all = "snake_case")]
pub enum AssetRef {
    Remote {
        url: String,
    },
    Local {
        reference: String,
        content_type: String,
        size_bytes: u64,
    },
}

impl AssetRef {
    pub fn remote(url: impl Into<String>) -> Self {
        Self::Remote { url: url.into() }
    }

    pub fn local(reference: impl Into<String>, content_type: impl Into<String>, size_bytes: u64) -> Self {
        Self::Local {
            reference: reference.into(),
            content_type: content_type.into(),
            size_bytes,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }

    /// The URL or local reference, whichever this asset holds.
    pub fn location(&self) -> &str {
        match self {
            Self::Remote { url } => url,
            Self::Local { reference, .. } => reference,
        }
    }
}

/// Fallback content type when a provider sends none we recognize.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// File extension for a content type, falling back to the URL's own
/// extension and finally to `bin`.
pub fn extension_for(content_type: &str, url: &str) -> String {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();
    let known = match essence.as_str() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "video/mp4" => Some("mp4"),
        "video/webm" => Some("webm"),
        _ => None,
    };
    if let Some(ext) = known {
        return ext.to_string();
    }

    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_location_tag() {
        let json = serde_json::to_value(AssetRef::remote("https://cdn/a.png")).unwrap();
        assert_eq!(json["location"], "remote");
        assert_eq!(json["url"], "https://cdn/a.png");

        let json = serde_json::to_value(AssetRef::local("/files/a.png", "image/png", 10)).unwrap();
        assert_eq!(json["location"], "local");
        assert_eq!(json["size_bytes"], 10);
    }

    #[test]
    fn extension_prefers_content_type() {
        assert_eq!(extension_for("image/png", "https://x/file.jpg"), "png");
        assert_eq!(extension_for("audio/mpeg; charset=binary", "https://x/a"), "mp3");
    }

    #[test]
    fn extension_falls_back_to_url() {
        assert_eq!(extension_for(DEFAULT_CONTENT_TYPE, "https://x/clip.MP4?sig=1"), "mp4");
        assert_eq!(extension_for("", "https://x/noext"), "bin");
        assert_eq!(extension_for("", "https://x/weird.tar-gz"), "bin");
    }
}
