//! Data models
//!
//! Rust structs for the records the data layer reads and writes.
//! Document-backed models deserialize straight from backend documents,
//! so their serde names follow the backend attribute names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string().to_ascii_lowercase())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Account & Session
// =============================================================================

/// Backend identity record
///
/// Created once at registration, never modified by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "$id")]
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(rename = "$createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Active sign-in session
///
/// Lifetime is owned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(rename = "$id")]
    pub id: String,
    /// Owning [`Account`] ID
    #[serde(rename = "userId")]
    pub account_id: String,
    #[serde(rename = "$createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "expire")]
    pub expires_at: DateTime<Utc>,
}

// =============================================================================
// User Profile
// =============================================================================

/// Application-level user document, linked to an [`Account`] by `account_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(rename = "$id")]
    pub id: String,
    pub account_id: String,
    pub name: String,
    pub username: String,
    pub email: String,
    pub image_url: String,
    #[serde(default)]
    pub bio: Option<String>,
}

/// Registration input
#[derive(Clone)]
pub struct NewUser {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("name", &self.name)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Sign-in input
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Post
// =============================================================================

/// A post document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(rename = "$id")]
    pub id: String,
    /// UserProfile document ID of the author
    pub creator: String,
    #[serde(default)]
    pub caption: String,
    /// Storage file ID of the image
    pub image_id: String,
    pub image_url: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "$createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "$updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// File picked by the user for upload
#[derive(Clone)]
pub struct MediaUpload {
    pub file_name: String,
    /// MIME type (e.g., "image/png")
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for MediaUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaUpload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Input for creating a post
#[derive(Debug, Clone)]
pub struct PostDraft {
    /// UserProfile document ID of the author
    pub creator: String,
    pub caption: String,
    pub file: Option<MediaUpload>,
    pub location: String,
    /// Raw comma-separated tag input
    pub tags: String,
}

/// Input for updating a post
///
/// `image_id` and `image_url` describe the media currently attached;
/// they are kept when `file` is `None`.
#[derive(Debug, Clone)]
pub struct PostUpdate {
    pub post_id: String,
    pub caption: String,
    pub file: Option<MediaUpload>,
    pub image_id: String,
    pub image_url: String,
    pub location: String,
    pub tags: String,
}

/// Split raw tag input ("rust, async ,web") into clean tags
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|tag| tag.chars().filter(|c| !c.is_whitespace()).collect::<String>())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Trimmed optional text, `None` when blank
pub fn normalize_optional_text(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// =============================================================================
// Paging
// =============================================================================

/// Opaque pagination token (ID of the last document on a page)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of a forward-only listing
///
/// `next_cursor == None` marks the last page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<Cursor>,
}

impl<T> Page<T> {
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}
