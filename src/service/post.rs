//! Post service
//!
//! Post writes (create, update, delete) and the cached post reads: single
//! post, recent posts, the paged feed and caption search.

use std::sync::Arc;

use serde_json::json;

use crate::backend::{Backend, Collection, DocQuery, DocumentList};
use crate::config::CacheConfig;
use crate::data::{
    Cursor, EntityId, Page, Post, PostDraft, PostUpdate, normalize_optional_text, parse_tags,
};
use crate::error::AppError;
use crate::metrics::observe_backend;
use crate::query::{Mutation, PagedState, QueryClient, QueryKey};
use crate::storage::{MediaStorage, StoredMedia};

/// Post service
pub struct PostService {
    backend: Arc<dyn Backend>,
    storage: Arc<MediaStorage>,
    queries: Arc<QueryClient>,
    page_size: usize,
    recent_limit: usize,
}

impl PostService {
    /// Create new post service
    pub fn new(
        backend: Arc<dyn Backend>,
        storage: Arc<MediaStorage>,
        queries: Arc<QueryClient>,
        cache: &CacheConfig,
    ) -> Self {
        Self {
            backend,
            storage,
            queries,
            page_size: cache.page_size,
            recent_limit: cache.recent_posts_limit,
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Create a post with an image
    ///
    /// Uploads the image first. If the document cannot be created the
    /// upload is deleted again.
    ///
    /// # Errors
    /// `Validation` without an image or author, otherwise whatever the
    /// upload or document write failed with
    pub async fn create_post(&self, draft: PostDraft) -> Result<Post, AppError> {
        let creator = draft.creator.trim();
        if creator.is_empty() {
            return Err(AppError::Validation("creator is required".to_string()));
        }
        let file = draft
            .file
            .as_ref()
            .ok_or_else(|| AppError::Validation("an image is required".to_string()))?;

        let media = self.storage.upload(file).await?;

        let post_id = EntityId::new().0;
        let created = observe_backend(
            "create_document",
            self.backend.create_document(
                Collection::Posts,
                &post_id,
                json!({
                    "creator": creator,
                    "caption": draft.caption,
                    "imageId": media.file.id,
                    "imageUrl": media.url,
                    "location": normalize_optional_text(&draft.location),
                    "tags": parse_tags(&draft.tags),
                }),
            ),
        )
        .await;
        let document = match created {
            Ok(document) => document,
            Err(error) => {
                self.storage.delete(&media.file.id).await;
                return Err(error);
            }
        };

        self.queries.apply(&Mutation::CreatePost).await;
        tracing::info!(post_id = %document.id, creator, "Created post");
        document.decode()
    }

    /// Update caption, location, tags and optionally the image
    ///
    /// A replacement image is uploaded before the write and deleted if the
    /// write fails. The previous image is deleted only after the write
    /// succeeds.
    pub async fn update_post(&self, update: PostUpdate) -> Result<Post, AppError> {
        if update.post_id.trim().is_empty() {
            return Err(AppError::Validation("post id is required".to_string()));
        }

        let replacement: Option<StoredMedia> = match &update.file {
            Some(file) => Some(self.storage.upload(file).await?),
            None => None,
        };
        let (image_id, image_url) = match &replacement {
            Some(media) => (media.file.id.clone(), media.url.clone()),
            None => (update.image_id.clone(), update.image_url.clone()),
        };

        let updated = observe_backend(
            "update_document",
            self.backend.update_document(
                Collection::Posts,
                &update.post_id,
                json!({
                    "caption": update.caption,
                    "imageId": image_id,
                    "imageUrl": image_url,
                    "location": normalize_optional_text(&update.location),
                    "tags": parse_tags(&update.tags),
                }),
            ),
        )
        .await;
        let document = match updated {
            Ok(document) => document,
            Err(error) => {
                if let Some(media) = &replacement {
                    self.storage.delete(&media.file.id).await;
                }
                return Err(error);
            }
        };

        if replacement.is_some() && !update.image_id.is_empty() && update.image_id != image_id {
            self.storage.delete(&update.image_id).await;
        }

        self.queries
            .apply(&Mutation::UpdatePost {
                post_id: update.post_id.clone(),
            })
            .await;
        tracing::info!(post_id = %update.post_id, new_image = replacement.is_some(), "Updated post");
        document.decode()
    }

    /// Delete a post and its image
    ///
    /// The image is removed after the document; a failed image delete is
    /// logged and does not fail the call.
    pub async fn delete_post(&self, post_id: &str, image_id: &str) -> Result<(), AppError> {
        if post_id.is_empty() || image_id.is_empty() {
            return Err(AppError::Validation(
                "post id and image id are required".to_string(),
            ));
        }

        observe_backend(
            "delete_document",
            self.backend.delete_document(Collection::Posts, post_id),
        )
        .await?;
        self.storage.delete(image_id).await;

        self.queries
            .apply(&Mutation::DeletePost {
                post_id: post_id.to_string(),
            })
            .await;
        tracing::info!(post_id, "Deleted post");
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Single post, cached per ID
    pub async fn post_by_id(&self, post_id: &str) -> Result<Arc<Post>, AppError> {
        if post_id.is_empty() {
            return Err(AppError::Validation("post id is required".to_string()));
        }

        let key = QueryKey::PostById(post_id.to_string());
        self.queries
            .posts
            .fetch(&key, || async {
                let document = observe_backend(
                    "get_document",
                    self.backend.get_document(Collection::Posts, post_id),
                )
                .await?;
                document.decode()
            })
            .await
    }

    /// Newest posts by creation time
    pub async fn recent_posts(&self) -> Result<Arc<Vec<Post>>, AppError> {
        let queries = [
            DocQuery::order_desc("$createdAt"),
            DocQuery::Limit(self.recent_limit as u32),
        ];
        self.queries
            .post_lists
            .fetch(&QueryKey::RecentPosts, || self.list_posts(&queries))
            .await
    }

    /// Load the feed's first page, or serve the cached pages while fresh
    pub async fn fetch_feed(&self) -> Result<PagedState<Post>, AppError> {
        self.queries
            .feed
            .fetch_first(&QueryKey::InfinitePosts, |cursor| self.load_feed_page(cursor))
            .await
    }

    /// Append the next feed page
    ///
    /// No-op once the last page has been loaded.
    pub async fn fetch_next_page(&self) -> Result<PagedState<Post>, AppError> {
        self.queries
            .feed
            .fetch_next(&QueryKey::InfinitePosts, |cursor| self.load_feed_page(cursor))
            .await
    }

    pub async fn has_next_page(&self) -> bool {
        self.queries.feed.has_more(&QueryKey::InfinitePosts).await
    }

    /// Cached feed pages without fetching
    pub async fn feed(&self) -> PagedState<Post> {
        self.queries.feed.snapshot(&QueryKey::InfinitePosts).await
    }

    /// Posts whose caption matches `term`
    ///
    /// A blank term yields an empty list without asking the backend.
    pub async fn search_posts(&self, term: &str) -> Result<Arc<Vec<Post>>, AppError> {
        let key = QueryKey::search(term);
        let QueryKey::SearchPosts(term) = &key else {
            return Err(AppError::Internal("search key without term".to_string()));
        };
        if term.is_empty() {
            return Ok(Arc::new(Vec::new()));
        }

        let queries = [DocQuery::search("caption", term)];
        self.queries
            .post_lists
            .fetch(&key, || self.list_posts(&queries))
            .await
    }

    // =========================================================================
    // Internal
    // =========================================================================

    /// One page of the feed, newest update first
    ///
    /// A short page is the last one; a full page carries the ID of its last
    /// post as the cursor for the next.
    async fn load_feed_page(&self, cursor: Option<Cursor>) -> Result<Page<Post>, AppError> {
        let mut queries = vec![
            DocQuery::order_desc("$updatedAt"),
            DocQuery::Limit(self.page_size as u32),
        ];
        if let Some(cursor) = &cursor {
            queries.push(DocQuery::CursorAfter(cursor.0.clone()));
        }

        let items = self.list_posts(&queries).await?;
        let next_cursor = if items.len() < self.page_size {
            None
        } else {
            items.last().map(|post| Cursor(post.id.clone()))
        };
        tracing::debug!(
            cursor = ?cursor,
            count = items.len(),
            last = next_cursor.is_none(),
            "Loaded feed page"
        );
        Ok(Page { items, next_cursor })
    }

    async fn list_posts(&self, queries: &[DocQuery]) -> Result<Vec<Post>, AppError> {
        let list = observe_backend(
            "list_documents",
            self.backend.list_documents(Collection::Posts, queries),
        )
        .await?;
        decode_posts(&list)
    }
}

fn decode_posts(list: &DocumentList) -> Result<Vec<Post>, AppError> {
    list.documents.iter().map(|document| document.decode()).collect()
}
