use serde::{Deserialize, Serialize};

/// A downloaded attachment, alive only for a single attach attempt.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MediaAsset {
    #[serde(rename = "sourceUrl")]
    pub source_url: String,
    pub filename: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

impl MediaAsset {
    pub fn is_gif(&self) -> bool {
        self.mime_type.eq_ignore_ascii_case("image/gif")
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn is_video(&self) -> bool {
        self.mime_type.starts_with("video/")
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MediaFailure {
    #[serde(rename = "sourceUrl")]
    pub source_url: String,
    pub error: String,
}

/// Answer to a media fetch request made by the page agent.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ok")]
pub enum MediaFetchResult {
    #[serde(rename = "true")]
    Fetched(MediaAsset),
    #[serde(rename = "false")]
    Failed(MediaFailure),
}

impl MediaFetchResult {
    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Failed(MediaFailure {
            source_url: url.into(),
            error: error.into(),
        })
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw.as_bytes()).map_err(serde::de::Error::custom)
    }
}
