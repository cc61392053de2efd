//! Appwrite REST backend
//!
//! Talks to an Appwrite-compatible API with reqwest. The session cookie
//! set by the sign-in response lives in the client's cookie store, which
//! is what makes the session ambient for later calls.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use super::{Backend, Collection, DocQuery, Document, DocumentList, StoredFile};
use crate::config::{BackendConfig, required};
use crate::data::{Account, MediaUpload, Session};
use crate::error::{AppError, Result};

/// Preview rendering used for post images
const PREVIEW_SIZE: u32 = 2000;
const PREVIEW_GRAVITY: &str = "top";
const PREVIEW_QUALITY: u32 = 100;

/// Error body returned by the API
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// Appwrite [`Backend`]
pub struct AppwriteBackend {
    client: reqwest::Client,
    endpoint: Url,
    project_id: String,
    database_id: String,
    user_collection_id: String,
    post_collection_id: String,
    storage_id: String,
}

impl AppwriteBackend {
    /// Create a client from validated backend configuration
    ///
    /// # Errors
    /// Returns error if a required setting is missing or the HTTP client
    /// cannot be built
    pub fn new(config: &BackendConfig) -> Result<Self> {
        use reqwest::header::{HeaderMap, HeaderValue};

        let appwrite = &config.appwrite;
        let endpoint = required("backend.appwrite.endpoint", &appwrite.endpoint)?;
        let project_id = required("backend.appwrite.project_id", &appwrite.project_id)?;

        // Path joins below rely on a trailing slash
        let endpoint = Url::parse(&format!("{}/", endpoint.trim_end_matches('/')))
            .map_err(|e| AppError::Config(format!("backend.appwrite.endpoint: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Appwrite-Project",
            HeaderValue::from_str(project_id)
                .map_err(|e| AppError::Config(format!("backend.appwrite.project_id: {e}")))?,
        );
        headers.insert(
            "X-Appwrite-Response-Format",
            HeaderValue::from_static("1.5.0"),
        );

        let client = reqwest::Client::builder()
            .user_agent("Snapgram/0.1.0")
            .timeout(config.timeout())
            .cookie_store(true)
            .default_headers(headers)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            project_id: project_id.to_string(),
            database_id: required("backend.appwrite.database_id", &appwrite.database_id)?
                .to_string(),
            user_collection_id: required(
                "backend.appwrite.user_collection_id",
                &appwrite.user_collection_id,
            )?
            .to_string(),
            post_collection_id: required(
                "backend.appwrite.post_collection_id",
                &appwrite.post_collection_id,
            )?
            .to_string(),
            storage_id: required("backend.appwrite.storage_id", &appwrite.storage_id)?
                .to_string(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.endpoint
            .join(path.trim_start_matches('/'))
            .map_err(|e| AppError::Internal(format!("invalid API path {path}: {e}")))
    }

    fn collection_id(&self, collection: Collection) -> &str {
        match collection {
            Collection::Users => &self.user_collection_id,
            Collection::Posts => &self.post_collection_id,
        }
    }

    fn documents_path(&self, collection: Collection) -> String {
        format!(
            "databases/{}/collections/{}/documents",
            self.database_id,
            self.collection_id(collection)
        )
    }

    fn files_path(&self) -> String {
        format!("storage/buckets/{}/files", self.storage_id)
    }

    /// Turn a non-success response into an error
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => match body.kind {
                Some(kind) => format!("{} ({kind})", body.message),
                None => body.message,
            },
            Err(_) => text,
        };
        Err(AppError::from_status(status.as_u16(), message))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = Self::check(request.send().await?).await?;
        Ok(response.json::<T>().await?)
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        Self::check(request.send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl Backend for AppwriteBackend {
    fn name(&self) -> &'static str {
        "appwrite"
    }

    async fn create_account(
        &self,
        account_id: &str,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<Account> {
        let request = self.client.post(self.url("account")?).json(&serde_json::json!({
            "userId": account_id,
            "email": email,
            "password": password,
            "name": name,
        }));
        self.send_json(request).await
    }

    async fn create_email_session(&self, email: &str, password: &str) -> Result<Session> {
        let request = self
            .client
            .post(self.url("account/sessions/email")?)
            .json(&serde_json::json!({
                "email": email,
                "password": password,
            }));
        self.send_json(request).await
    }

    async fn delete_current_session(&self) -> Result<()> {
        let request = self.client.delete(self.url("account/sessions/current")?);
        self.send_empty(request).await
    }

    async fn get_account(&self) -> Result<Account> {
        let request = self.client.get(self.url("account")?);
        self.send_json(request).await
    }

    fn avatar_initials_url(&self, name: &str) -> String {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map(|mut segments| {
                segments.pop_if_empty().push("avatars").push("initials");
            })
            .ok();
        url.query_pairs_mut()
            .append_pair("name", name)
            .append_pair("project", &self.project_id);
        url.to_string()
    }

    async fn list_documents(
        &self,
        collection: Collection,
        queries: &[DocQuery],
    ) -> Result<DocumentList> {
        let mut url = self.url(&self.documents_path(collection))?;
        {
            let mut pairs = url.query_pairs_mut();
            for query in queries {
                pairs.append_pair("queries[]", &query.to_wire());
            }
        }
        self.send_json(self.client.get(url)).await
    }

    async fn get_document(&self, collection: Collection, document_id: &str) -> Result<Document> {
        let url = self.url(&format!(
            "{}/{}",
            self.documents_path(collection),
            document_id
        ))?;
        self.send_json(self.client.get(url)).await
    }

    async fn create_document(
        &self,
        collection: Collection,
        document_id: &str,
        data: Value,
    ) -> Result<Document> {
        let request = self
            .client
            .post(self.url(&self.documents_path(collection))?)
            .json(&serde_json::json!({
                "documentId": document_id,
                "data": data,
            }));
        self.send_json(request).await
    }

    async fn update_document(
        &self,
        collection: Collection,
        document_id: &str,
        data: Value,
    ) -> Result<Document> {
        let url = self.url(&format!(
            "{}/{}",
            self.documents_path(collection),
            document_id
        ))?;
        let request = self
            .client
            .patch(url)
            .json(&serde_json::json!({ "data": data }));
        self.send_json(request).await
    }

    async fn delete_document(&self, collection: Collection, document_id: &str) -> Result<()> {
        let url = self.url(&format!(
            "{}/{}",
            self.documents_path(collection),
            document_id
        ))?;
        self.send_empty(self.client.delete(url)).await
    }

    async fn create_file(&self, file_id: &str, upload: &MediaUpload) -> Result<StoredFile> {
        use reqwest::multipart::{Form, Part};

        let part = Part::bytes(upload.bytes.clone())
            .file_name(upload.file_name.clone())
            .mime_str(&upload.content_type)
            .map_err(|e| AppError::Validation(format!("invalid content type: {e}")))?;
        let form = Form::new()
            .text("fileId", file_id.to_string())
            .part("file", part);

        let request = self
            .client
            .post(self.url(&self.files_path())?)
            .multipart(form);
        self.send_json(request).await
    }

    fn file_preview_url(&self, file_id: &str) -> String {
        let Ok(mut url) = self.url(&format!("{}/{}/preview", self.files_path(), file_id)) else {
            return String::new();
        };
        url.query_pairs_mut()
            .append_pair("width", &PREVIEW_SIZE.to_string())
            .append_pair("height", &PREVIEW_SIZE.to_string())
            .append_pair("gravity", PREVIEW_GRAVITY)
            .append_pair("quality", &PREVIEW_QUALITY.to_string())
            .append_pair("project", &self.project_id);
        url.to_string()
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        let url = self.url(&format!("{}/{}", self.files_path(), file_id))?;
        self.send_empty(self.client.delete(url)).await
    }
}
