//! Backend-as-a-service boundary
//!
//! The data layer talks to the hosted backend only through [`Backend`]:
//! - Accounts and the ambient session
//! - Document collections with a small query vocabulary
//! - Blob storage for post media
//!
//! Two implementations ship with the crate: [`MemoryBackend`] keeps
//! everything in process, [`AppwriteBackend`] speaks the Appwrite REST API.

mod appwrite;
mod memory;

pub use appwrite::AppwriteBackend;
pub use memory::MemoryBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::data::{Account, MediaUpload, Session};
use crate::error::Result;

// =============================================================================
// Documents
// =============================================================================

/// Document collections used by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Posts,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Posts => "posts",
        }
    }
}

/// A stored document: system attributes plus free-form data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "$createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "$updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Document {
    /// Decode into a typed model
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Look up an attribute, system attributes included
    pub fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "$id" => Some(Value::String(self.id.clone())),
            "$createdAt" => Some(Value::String(self.created_at.to_rfc3339())),
            "$updatedAt" => Some(Value::String(self.updated_at.to_rfc3339())),
            _ => self.data.get(name).cloned(),
        }
    }
}

/// Result of a document listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentList {
    pub total: u64,
    pub documents: Vec<Document>,
}

/// Listing filters, ordering and paging
#[derive(Debug, Clone, PartialEq)]
pub enum DocQuery {
    Equal(String, Vec<Value>),
    Search(String, String),
    OrderDesc(String),
    OrderAsc(String),
    Limit(u32),
    CursorAfter(String),
}

impl DocQuery {
    pub fn equal(attribute: &str, value: impl Into<Value>) -> Self {
        Self::Equal(attribute.to_string(), vec![value.into()])
    }

    pub fn search(attribute: &str, term: &str) -> Self {
        Self::Search(attribute.to_string(), term.to_string())
    }

    pub fn order_desc(attribute: &str) -> Self {
        Self::OrderDesc(attribute.to_string())
    }

    /// Wire form understood by the Appwrite REST API
    pub fn to_wire(&self) -> String {
        let value = match self {
            Self::Equal(attribute, values) => serde_json::json!({
                "method": "equal",
                "attribute": attribute,
                "values": values,
            }),
            Self::Search(attribute, term) => serde_json::json!({
                "method": "search",
                "attribute": attribute,
                "values": [term],
            }),
            Self::OrderDesc(attribute) => serde_json::json!({
                "method": "orderDesc",
                "attribute": attribute,
            }),
            Self::OrderAsc(attribute) => serde_json::json!({
                "method": "orderAsc",
                "attribute": attribute,
            }),
            Self::Limit(limit) => serde_json::json!({
                "method": "limit",
                "values": [limit],
            }),
            Self::CursorAfter(id) => serde_json::json!({
                "method": "cursorAfter",
                "values": [id],
            }),
        };
        value.to_string()
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Metadata of an uploaded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    #[serde(rename = "$id")]
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(rename = "sizeOriginal")]
    pub size: u64,
}

// =============================================================================
// Backend trait
// =============================================================================

/// Remote operations offered by the hosted backend
///
/// Session state is ambient: a successful `create_email_session` makes
/// later account calls act on behalf of that session until
/// `delete_current_session`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    async fn create_account(
        &self,
        account_id: &str,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<Account>;

    async fn create_email_session(&self, email: &str, password: &str) -> Result<Session>;

    async fn delete_current_session(&self) -> Result<()>;

    /// Account of the current session
    async fn get_account(&self) -> Result<Account>;

    /// URL of a generated initials avatar
    fn avatar_initials_url(&self, name: &str) -> String;

    async fn list_documents(
        &self,
        collection: Collection,
        queries: &[DocQuery],
    ) -> Result<DocumentList>;

    async fn get_document(&self, collection: Collection, document_id: &str) -> Result<Document>;

    async fn create_document(
        &self,
        collection: Collection,
        document_id: &str,
        data: Value,
    ) -> Result<Document>;

    /// Merge `data` into an existing document
    async fn update_document(
        &self,
        collection: Collection,
        document_id: &str,
        data: Value,
    ) -> Result<Document>;

    async fn delete_document(&self, collection: Collection, document_id: &str) -> Result<()>;

    async fn create_file(&self, file_id: &str, upload: &MediaUpload) -> Result<StoredFile>;

    /// Public preview URL of a stored file
    fn file_preview_url(&self, file_id: &str) -> String;

    async fn delete_file(&self, file_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_encode_to_wire_json() {
        let equal: Value =
            serde_json::from_str(&DocQuery::equal("accountId", "a1").to_wire()).unwrap();
        assert_eq!(equal["method"], "equal");
        assert_eq!(equal["attribute"], "accountId");
        assert_eq!(equal["values"][0], "a1");

        let limit: Value = serde_json::from_str(&DocQuery::Limit(9).to_wire()).unwrap();
        assert_eq!(limit["values"][0], 9);
    }

    #[test]
    fn document_decodes_flattened_data() {
        let document: Document = serde_json::from_value(serde_json::json!({
            "$id": "u1",
            "$createdAt": "2024-01-01T00:00:00Z",
            "$updatedAt": "2024-01-01T00:00:00Z",
            "$collectionId": "users",
            "accountId": "a1",
            "name": "Ada",
            "username": "ada",
            "email": "ada@example.com",
            "imageUrl": "https://avatars.example.com/ada"
        }))
        .unwrap();

        assert_eq!(document.attribute("accountId"), Some(Value::from("a1")));
        let profile: crate::data::UserProfile = document.decode().unwrap();
        assert_eq!(profile.account_id, "a1");
        assert_eq!(profile.bio, None);
    }
}
