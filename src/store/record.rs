//! Image records: per-image metadata and lifecycle state.
//!
//! The record store is the single collaborator workers mutate. The
//! lifecycle is an explicit state machine (`Pending → Processing → Ready`
//! or `→ Failed`); geometry fields (width, height, max zoom level) may only
//! be written together with the transition to `Ready`, so a `Ready` record
//! always carries complete geometry and a non-`Ready` record never does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::ImageFormat;
use serde::{Deserialize, Serialize};

use crate::error::RecordError;

// =============================================================================
// Media Type
// =============================================================================

/// Raster encoding of a stored image.
///
/// `Jpg` and `Jpeg` are the same encoding but distinct variants: blob keys
/// are built from the extension the uploader wrote, so the literal spelling
/// must survive the parse. `extension()` round-trips whatever
/// `from_extension` consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Png,
    Jpg,
    Jpeg,
}

impl MediaType {
    /// Parse from a file extension (`png`, `jpg`, `jpeg`).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(MediaType::Png),
            "jpg" => Some(MediaType::Jpg),
            "jpeg" => Some(MediaType::Jpeg),
            _ => None,
        }
    }

    /// File extension as it appears in blob keys.
    pub fn extension(&self) -> &'static str {
        match self {
            MediaType::Png => "png",
            MediaType::Jpg => "jpg",
            MediaType::Jpeg => "jpeg",
        }
    }

    /// MIME content type for blob uploads.
    pub fn content_type(&self) -> &'static str {
        match self {
            MediaType::Png => "image/png",
            MediaType::Jpg | MediaType::Jpeg => "image/jpeg",
        }
    }

    /// The `image` crate format used for encoding.
    pub fn image_format(&self) -> ImageFormat {
        match self {
            MediaType::Png => ImageFormat::Png,
            MediaType::Jpg | MediaType::Jpeg => ImageFormat::Jpeg,
        }
    }
}

// =============================================================================
// Lifecycle State
// =============================================================================

/// Lifecycle state of an image record.
///
/// `Failed` is a distinct terminal state: a caller can always tell a dead
/// image from one still queued or in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageState {
    /// Record created, processing job not yet picked up
    Pending,
    /// A worker holds the job
    Processing,
    /// Pyramid complete, geometry fields set
    Ready,
    /// Terminal failure (bad input or exhausted retries)
    Failed,
}

impl ImageState {
    /// Whether a transition from `self` to `to` is allowed.
    ///
    /// `Processing → Processing` covers at-least-once redelivery;
    /// `Ready/Failed → Processing` covers reprocessing and retries.
    /// `Pending → Failed` covers jobs rejected at the queue boundary
    /// before any work starts.
    pub fn can_transition(self, to: ImageState) -> bool {
        use ImageState::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Processing)
                | (Processing, Ready)
                | (Processing, Failed)
                | (Ready, Processing)
                | (Failed, Processing)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageState::Pending => "pending",
            ImageState::Processing => "processing",
            ImageState::Ready => "ready",
            ImageState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ImageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an image came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivationKind {
    /// Uploaded by a user
    Original,
    /// Produced by the clip worker
    Clipped,
    /// Produced by the blend worker
    Blended,
}

impl DerivationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivationKind::Original => "original",
            DerivationKind::Clipped => "clipped",
            DerivationKind::Blended => "blended",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "original" => Some(DerivationKind::Original),
            "clipped" => Some(DerivationKind::Clipped),
            "blended" => Some(DerivationKind::Blended),
            _ => None,
        }
    }
}

// =============================================================================
// Image Record
// =============================================================================

/// Persisted metadata row for one image, keyed by (owner id, image id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub owner_id: u64,
    pub image_id: String,
    pub original_name: String,
    pub media_type: Option<MediaType>,
    pub state: ImageState,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub max_zoom_level: Option<u32>,
    pub kind: DerivationKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageRecord {
    /// Create a fresh `Pending` record with no geometry.
    pub fn new(
        owner_id: u64,
        image_id: impl Into<String>,
        original_name: impl Into<String>,
        media_type: Option<MediaType>,
        kind: DerivationKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            owner_id,
            image_id: image_id.into(),
            original_name: original_name.into(),
            media_type,
            state: ImageState::Pending,
            width: None,
            height: None,
            max_zoom_level: None,
            kind,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// Record Update
// =============================================================================

/// Geometry fields, set atomically with the `Ready` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub max_zoom_level: u32,
}

/// A validated partial update to an image record.
#[derive(Debug, Clone, Default)]
pub struct RecordUpdate {
    pub(crate) state: Option<ImageState>,
    pub(crate) media_type: Option<MediaType>,
    pub(crate) geometry: Option<Geometry>,
}

impl RecordUpdate {
    /// Transition to a new state without touching other fields.
    pub fn state(state: ImageState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    /// Set the media type (used when a derived raster is persisted as PNG).
    pub fn media_type(media_type: MediaType) -> Self {
        Self {
            media_type: Some(media_type),
            ..Default::default()
        }
    }

    /// Transition to `Ready`, setting geometry and media type atomically.
    pub fn ready(width: u32, height: u32, max_zoom_level: u32, media_type: MediaType) -> Self {
        Self {
            state: Some(ImageState::Ready),
            media_type: Some(media_type),
            geometry: Some(Geometry {
                width,
                height,
                max_zoom_level,
            }),
        }
    }

    /// Check this update against the record's current state.
    pub fn validate(&self, current: &ImageRecord) -> Result<(), RecordError> {
        if let Some(to) = self.state {
            if !current.state.can_transition(to) {
                return Err(RecordError::InvalidTransition {
                    from: current.state.to_string(),
                    to: to.to_string(),
                });
            }
        }

        if self.geometry.is_some() && self.state != Some(ImageState::Ready) {
            return Err(RecordError::GeometryOutsideReady {
                state: self
                    .state
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| current.state.to_string()),
            });
        }

        Ok(())
    }

    /// Apply the update in place. Call `validate` first.
    ///
    /// Geometry is cleared on any transition away from `Ready`, preserving
    /// the invariant that only `Ready` records carry geometry.
    pub fn apply(&self, record: &mut ImageRecord, now: DateTime<Utc>) {
        if let Some(state) = self.state {
            record.state = state;
            if state != ImageState::Ready {
                record.width = None;
                record.height = None;
                record.max_zoom_level = None;
            }
        }
        if let Some(media_type) = self.media_type {
            record.media_type = Some(media_type);
        }
        if let Some(g) = self.geometry {
            record.width = Some(g.width);
            record.height = Some(g.height);
            record.max_zoom_level = Some(g.max_zoom_level);
        }
        record.updated_at = now;
    }
}

// =============================================================================
// Record Store Trait
// =============================================================================

/// Persistence for image records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record. Overwrites an existing row with the same key.
    async fn insert(&self, record: ImageRecord) -> Result<(), RecordError>;

    /// Fetch a record by key.
    async fn get(&self, owner_id: u64, image_id: &str)
        -> Result<Option<ImageRecord>, RecordError>;

    /// Apply a validated update to an existing record.
    async fn update(
        &self,
        owner_id: u64,
        image_id: &str,
        update: RecordUpdate,
    ) -> Result<(), RecordError>;

    /// Convenience lookup of just the media type.
    async fn media_type(
        &self,
        owner_id: u64,
        image_id: &str,
    ) -> Result<Option<MediaType>, RecordError> {
        Ok(self.get(owner_id, image_id).await?.and_then(|r| r.media_type))
    }
}

// =============================================================================
// Tests
// =============================================================================
