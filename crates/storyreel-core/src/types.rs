//! Storyreel Core Type Definitions
//!
//! Shared domain types: render option enums and inline image payloads.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Render Option Enums
// =============================================================================

/// Image model quality/cost tier.
///
/// `Standard` targets the fast image model; `Pro` targets the high-fidelity
/// model that also honors an output resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Standard,
    Pro,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Standard => "standard",
            ModelTier::Pro => "pro",
        }
    }
}

impl Default for ModelTier {
    fn default() -> Self {
        ModelTier::Standard
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelTier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(ModelTier::Standard),
            "pro" => Ok(ModelTier::Pro),
            other => Err(CoreError::ValidationError(format!(
                "Unknown model tier: {other}"
            ))),
        }
    }
}

/// Output aspect ratio, serialized in the provider's `W:H` notation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "9:16")]
    Vertical,
    #[serde(rename = "16:9")]
    Widescreen,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "3:4",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Vertical => "9:16",
            AspectRatio::Widescreen => "16:9",
        }
    }

    pub fn all() -> &'static [AspectRatio] {
        &[
            AspectRatio::Square,
            AspectRatio::Portrait,
            AspectRatio::Landscape,
            AspectRatio::Vertical,
            AspectRatio::Widescreen,
        ]
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        AspectRatio::Widescreen
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AspectRatio {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1:1" => Ok(AspectRatio::Square),
            "3:4" => Ok(AspectRatio::Portrait),
            "4:3" => Ok(AspectRatio::Landscape),
            "9:16" => Ok(AspectRatio::Vertical),
            "16:9" => Ok(AspectRatio::Widescreen),
            other => Err(CoreError::ValidationError(format!(
                "Unknown aspect ratio: {other}"
            ))),
        }
    }
}

/// Output image resolution. Only honored by the `Pro` tier; the standard
/// model ignores it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageResolution {
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl ImageResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageResolution::OneK => "1K",
            ImageResolution::TwoK => "2K",
            ImageResolution::FourK => "4K",
        }
    }
}

impl Default for ImageResolution {
    fn default() -> Self {
        ImageResolution::OneK
    }
}

impl std::fmt::Display for ImageResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ImageResolution {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "1K" => Ok(ImageResolution::OneK),
            "2K" => Ok(ImageResolution::TwoK),
            "4K" => Ok(ImageResolution::FourK),
            other => Err(CoreError::ValidationError(format!(
                "Unknown image resolution: {other}"
            ))),
        }
    }
}

// =============================================================================
// Title Candidates
// =============================================================================

/// A suggested publishing title with its localized counterpart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleCandidate {
    /// Primary (English) title.
    pub primary: String,
    /// Localized translation of the primary title.
    pub localized: String,
}

impl TitleCandidate {
    pub fn new(primary: impl Into<String>, localized: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            localized: localized.into(),
        }
    }
}

// =============================================================================
// Inline Image Payloads
// =============================================================================

/// An image carried inline as base64, convertible to and from data URIs.
///
/// Payloads arrive either as full `data:<mime>;base64,<data>` URIs or as bare
/// base64 strings; both forms are accepted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    pub mime_type: String,
    pub base64_data: String,
}

impl ImageData {
    /// Wraps raw bytes with the given mime type.
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            base64_data: BASE64.encode(bytes),
        }
    }

    /// Parses a data URI. A bare base64 string is accepted and assumed to be
    /// JPEG, matching how uploads without a header are treated.
    pub fn from_data_uri(uri: &str) -> CoreResult<Self> {
        let trimmed = uri.trim();
        if trimmed.is_empty() {
            return Err(CoreError::ValidationError("Image payload is empty".into()));
        }

        if let Some(rest) = trimmed.strip_prefix("data:") {
            let (header, payload) = rest.split_once(',').ok_or_else(|| {
                CoreError::ValidationError("Malformed data URI: missing payload".into())
            })?;
            let mime_type = header
                .strip_suffix(";base64")
                .ok_or_else(|| {
                    CoreError::ValidationError("Only base64 data URIs are supported".into())
                })?
                .to_string();
            let mime_type = if mime_type.is_empty() {
                "image/jpeg".to_string()
            } else {
                mime_type
            };
            Ok(Self {
                mime_type,
                base64_data: payload.to_string(),
            })
        } else {
            Ok(Self {
                mime_type: "image/jpeg".to_string(),
                base64_data: trimmed.to_string(),
            })
        }
    }

    /// Emits the `data:<mime>;base64,<data>` form.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_data)
    }

    /// Decodes the payload back to raw bytes.
    pub fn decode(&self) -> CoreResult<Vec<u8>> {
        BASE64
            .decode(self.base64_data.as_bytes())
            .map_err(|e| CoreError::ValidationError(format!("Invalid base64 payload: {e}")))
    }
}

/// Decodes the payload of a `data:` URI (or bare base64 string) to raw bytes.
pub fn decode_data_uri(uri: &str) -> CoreResult<Vec<u8>> {
    ImageData::from_data_uri(uri)?.decode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_ratio_round_trips_wire_notation() {
        for ratio in AspectRatio::all() {
            let parsed: AspectRatio = ratio.as_str().parse().unwrap();
            assert_eq!(parsed, *ratio);
        }
        assert!("21:9".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn resolution_parse_is_case_insensitive() {
        assert_eq!("2k".parse::<ImageResolution>().unwrap(), ImageResolution::TwoK);
        assert_eq!("4K".parse::<ImageResolution>().unwrap(), ImageResolution::FourK);
        assert!("8K".parse::<ImageResolution>().is_err());
    }

    #[test]
    fn aspect_ratio_serializes_as_wire_string() {
        let json = serde_json::to_string(&AspectRatio::Widescreen).unwrap();
        assert_eq!(json, "\"16:9\"");
    }

    #[test]
    fn image_data_round_trips_data_uri() {
        let img = ImageData::from_bytes("image/png", b"pixels");
        let uri = img.to_data_uri();
        assert!(uri.starts_with("data:image/png;base64,"));

        let parsed = ImageData::from_data_uri(&uri).unwrap();
        assert_eq!(parsed, img);
        assert_eq!(parsed.decode().unwrap(), b"pixels");
    }

    #[test]
    fn bare_base64_assumed_jpeg() {
        let raw = BASE64.encode(b"jpeg bytes");
        let parsed = ImageData::from_data_uri(&raw).unwrap();
        assert_eq!(parsed.mime_type, "image/jpeg");
        assert_eq!(parsed.decode().unwrap(), b"jpeg bytes");
    }

    #[test]
    fn malformed_data_uri_rejected() {
        assert!(ImageData::from_data_uri("").is_err());
        assert!(ImageData::from_data_uri("data:image/png;base64").is_err());
        assert!(ImageData::from_data_uri("data:image/png,plain").is_err());
    }
}
