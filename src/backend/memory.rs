//! In-process backend
//!
//! Behaves like the hosted backend closely enough for local runs and
//! tests: unique emails, hashed passwords, a single ambient session,
//! ordered and filtered listings with cursor paging, and blob storage.
//! Failure injection and per-operation request counters make cache
//! behavior observable.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use super::{Backend, Collection, DocQuery, Document, DocumentList, StoredFile};
use crate::data::{Account, EntityId, MediaUpload, Session};
use crate::error::{AppError, Result};

const DEFAULT_LIST_LIMIT: u32 = 25;
const MIN_PASSWORD_LEN: usize = 8;
const SESSION_TTL_DAYS: i64 = 365;

struct StoredAccount {
    account: Account,
    password_digest: String,
}

struct StoredBlob {
    file: StoredFile,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, StoredAccount>,
    sessions: HashMap<String, Session>,
    current_session: Option<String>,
    collections: HashMap<Collection, Vec<Document>>,
    files: HashMap<String, StoredBlob>,
    last_write: Option<DateTime<Utc>>,
}

impl State {
    /// Strictly increasing write timestamps keep ordering deterministic
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_write {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_write = Some(stamp);
        stamp
    }

    fn current_account(&self) -> Result<&Account> {
        let session_id = self.current_session.as_ref().ok_or(AppError::Unauthorized)?;
        let session = self.sessions.get(session_id).ok_or(AppError::Unauthorized)?;
        self.accounts
            .get(&session.account_id)
            .map(|stored| &stored.account)
            .ok_or(AppError::Unauthorized)
    }
}

/// In-memory [`Backend`]
pub struct MemoryBackend {
    state: RwLock<State>,
    offline: AtomicBool,
    latency: Mutex<Option<Duration>>,
    requests: Mutex<HashMap<&'static str, usize>>,
    base_url: String,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            offline: AtomicBool::new(false),
            latency: Mutex::new(None),
            requests: Mutex::new(HashMap::new()),
            base_url: "memory://snapgram".to_string(),
        }
    }

    /// Make every following call fail with a transport error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, AtomicOrdering::SeqCst);
    }

    /// Delay every following call
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut slot) = self.latency.lock() {
            *slot = latency;
        }
    }

    /// How many times an operation has been called
    pub fn request_count(&self, operation: &str) -> usize {
        self.requests
            .lock()
            .map(|requests| requests.get(operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Number of stored files
    pub async fn file_count(&self) -> usize {
        self.state.read().await.files.len()
    }

    /// Metadata and contents of a stored file
    pub async fn file(&self, file_id: &str) -> Option<(StoredFile, Vec<u8>)> {
        self.state
            .read()
            .await
            .files
            .get(file_id)
            .map(|blob| (blob.file.clone(), blob.bytes.clone()))
    }

    /// Number of documents in a collection
    pub async fn document_count(&self, collection: Collection) -> usize {
        self.state
            .read()
            .await
            .collections
            .get(&collection)
            .map_or(0, Vec::len)
    }

    async fn enter(&self, operation: &'static str) -> Result<()> {
        if let Ok(mut requests) = self.requests.lock() {
            *requests.entry(operation).or_insert(0) += 1;
        }

        let latency = self.latency.lock().ok().and_then(|slot| *slot);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.offline.load(AtomicOrdering::SeqCst) {
            return Err(AppError::Transport("backend unreachable".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn password_digest(account_id: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account_id.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn into_object(data: Value) -> Result<serde_json::Map<String, Value>> {
    match data {
        Value::Object(mut map) => {
            map.retain(|key, _| !key.starts_with('$'));
            Ok(map)
        }
        _ => Err(AppError::Validation(
            "document data must be a JSON object".to_string(),
        )),
    }
}

fn compare_attribute(a: &Document, b: &Document, attribute: &str) -> Ordering {
    match attribute {
        "$createdAt" => a.created_at.cmp(&b.created_at),
        "$updatedAt" => a.updated_at.cmp(&b.updated_at),
        _ => compare_values(a.attribute(attribute), b.attribute(attribute)),
    }
}

fn compare_values(a: Option<Value>, b: Option<Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

fn matches_search(document: &Document, attribute: &str, term: &str) -> bool {
    let Some(Value::String(text)) = document.attribute(attribute) else {
        return false;
    };
    let text = text.to_lowercase();
    term.split_whitespace()
        .any(|word| text.contains(&word.to_lowercase()))
}

fn apply_queries(documents: &[Document], queries: &[DocQuery]) -> Result<DocumentList> {
    let mut selected: Vec<Document> = documents
        .iter()
        .filter(|document| {
            queries.iter().all(|query| match query {
                DocQuery::Equal(attribute, values) => document
                    .attribute(attribute)
                    .is_some_and(|value| values.contains(&value)),
                DocQuery::Search(attribute, term) => matches_search(document, attribute, term),
                _ => true,
            })
        })
        .cloned()
        .collect();

    // Later orderings break ties of earlier ones
    for query in queries.iter().rev() {
        match query {
            DocQuery::OrderDesc(attribute) => {
                selected.sort_by(|a, b| compare_attribute(b, a, attribute));
            }
            DocQuery::OrderAsc(attribute) => {
                selected.sort_by(|a, b| compare_attribute(a, b, attribute));
            }
            _ => {}
        }
    }

    let total = selected.len() as u64;

    if let Some(cursor) = queries.iter().find_map(|query| match query {
        DocQuery::CursorAfter(id) => Some(id),
        _ => None,
    }) {
        let position = selected
            .iter()
            .position(|document| &document.id == cursor)
            .ok_or_else(|| {
                AppError::Validation(format!("cursor document {cursor} not found"))
            })?;
        selected.drain(..=position);
    }

    let limit = queries
        .iter()
        .find_map(|query| match query {
            DocQuery::Limit(limit) => Some(*limit),
            _ => None,
        })
        .unwrap_or(DEFAULT_LIST_LIMIT);
    selected.truncate(limit as usize);

    Ok(DocumentList {
        total,
        documents: selected,
    })
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create_account(
        &self,
        account_id: &str,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<Account> {
        self.enter("create_account").await?;

        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let mut state = self.state.write().await;
        let email = email.trim().to_ascii_lowercase();
        if state.accounts.contains_key(account_id) {
            return Err(AppError::Conflict(
                "an account with the same id already exists".to_string(),
            ));
        }
        if state
            .accounts
            .values()
            .any(|stored| stored.account.email == email)
        {
            return Err(AppError::Conflict(
                "an account with the same email already exists".to_string(),
            ));
        }

        let account = Account {
            id: account_id.to_string(),
            email,
            name: name.to_string(),
            created_at: state.next_timestamp(),
        };
        state.accounts.insert(
            account_id.to_string(),
            StoredAccount {
                account: account.clone(),
                password_digest: password_digest(account_id, password),
            },
        );

        Ok(account)
    }

    async fn create_email_session(&self, email: &str, password: &str) -> Result<Session> {
        self.enter("create_email_session").await?;

        let mut state = self.state.write().await;
        if state.current_session.is_some() {
            return Err(AppError::Conflict(
                "a session is already active".to_string(),
            ));
        }

        let email = email.trim().to_ascii_lowercase();
        let account_id = state
            .accounts
            .values()
            .find(|stored| {
                stored.account.email == email
                    && stored.password_digest == password_digest(&stored.account.id, password)
            })
            .map(|stored| stored.account.id.clone())
            .ok_or(AppError::Unauthorized)?;

        let created_at = state.next_timestamp();
        let session = Session {
            id: EntityId::new().0,
            account_id,
            created_at,
            expires_at: created_at + chrono::Duration::days(SESSION_TTL_DAYS),
        };
        state.sessions.insert(session.id.clone(), session.clone());
        state.current_session = Some(session.id.clone());

        Ok(session)
    }

    async fn delete_current_session(&self) -> Result<()> {
        self.enter("delete_current_session").await?;

        let mut state = self.state.write().await;
        let session_id = state.current_session.take().ok_or(AppError::Unauthorized)?;
        state.sessions.remove(&session_id);
        Ok(())
    }

    async fn get_account(&self) -> Result<Account> {
        self.enter("get_account").await?;

        let state = self.state.read().await;
        state.current_account().cloned()
    }

    fn avatar_initials_url(&self, name: &str) -> String {
        let initials: String = name
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .take(2)
            .collect::<String>()
            .to_uppercase();
        format!("{}/avatars/initials/{}", self.base_url, initials)
    }

    async fn list_documents(
        &self,
        collection: Collection,
        queries: &[DocQuery],
    ) -> Result<DocumentList> {
        self.enter("list_documents").await?;

        let state = self.state.read().await;
        let documents = state
            .collections
            .get(&collection)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        apply_queries(documents, queries)
    }

    async fn get_document(&self, collection: Collection, document_id: &str) -> Result<Document> {
        self.enter("get_document").await?;

        let state = self.state.read().await;
        state
            .collections
            .get(&collection)
            .and_then(|documents| documents.iter().find(|d| d.id == document_id))
            .cloned()
            .ok_or(AppError::NotFound)
    }

    async fn create_document(
        &self,
        collection: Collection,
        document_id: &str,
        data: Value,
    ) -> Result<Document> {
        self.enter("create_document").await?;

        let data = into_object(data)?;
        let mut state = self.state.write().await;
        let timestamp = state.next_timestamp();
        let documents = state.collections.entry(collection).or_default();
        if documents.iter().any(|d| d.id == document_id) {
            return Err(AppError::Conflict(format!(
                "document {document_id} already exists"
            )));
        }

        let document = Document {
            id: document_id.to_string(),
            created_at: timestamp,
            updated_at: timestamp,
            data,
        };
        documents.push(document.clone());
        Ok(document)
    }

    async fn update_document(
        &self,
        collection: Collection,
        document_id: &str,
        data: Value,
    ) -> Result<Document> {
        self.enter("update_document").await?;

        let data = into_object(data)?;
        let mut state = self.state.write().await;
        let timestamp = state.next_timestamp();
        let document = state
            .collections
            .get_mut(&collection)
            .and_then(|documents| documents.iter_mut().find(|d| d.id == document_id))
            .ok_or(AppError::NotFound)?;

        document.data.extend(data);
        document.updated_at = timestamp;
        Ok(document.clone())
    }

    async fn delete_document(&self, collection: Collection, document_id: &str) -> Result<()> {
        self.enter("delete_document").await?;

        let mut state = self.state.write().await;
        let documents = state
            .collections
            .get_mut(&collection)
            .ok_or(AppError::NotFound)?;
        let before = documents.len();
        documents.retain(|d| d.id != document_id);
        if documents.len() == before {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn create_file(&self, file_id: &str, upload: &MediaUpload) -> Result<StoredFile> {
        self.enter("create_file").await?;

        let mut state = self.state.write().await;
        if state.files.contains_key(file_id) {
            return Err(AppError::Conflict(format!("file {file_id} already exists")));
        }

        let file = StoredFile {
            id: file_id.to_string(),
            name: upload.file_name.clone(),
            mime_type: upload.content_type.clone(),
            size: upload.bytes.len() as u64,
        };
        state.files.insert(
            file_id.to_string(),
            StoredBlob {
                file: file.clone(),
                bytes: upload.bytes.clone(),
            },
        );
        Ok(file)
    }

    fn file_preview_url(&self, file_id: &str) -> String {
        format!("{}/files/{}/preview", self.base_url, file_id)
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        self.enter("delete_file").await?;

        let mut state = self.state.write().await;
        state
            .files
            .remove(file_id)
            .map(|_| ())
            .ok_or(AppError::NotFound)
    }
}
