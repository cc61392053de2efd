//! Query cache
//!
//! Keyed, time-bounded cache of server data with request coalescing,
//! explicit invalidation and cursor-paginated lists. Mutations declare
//! which keys they make stale (see [`Mutation::invalidates`]); the
//! [`QueryClient`] routes each key to the store that owns it.

mod coalesce;
mod key;
mod mutation;
mod observer;
mod paged;
mod store;

pub use key::QueryKey;
pub use mutation::Mutation;
pub use observer::{MutationObserver, MutationState, MutationStatus, QueryObserver};
pub use paged::{PagedState, PagedStore};
pub use store::{QueryState, QueryStatus, QueryStore};

use crate::config::CacheConfig;
use crate::data::{Post, UserProfile};
use crate::metrics::CACHE_INVALIDATIONS_TOTAL;

/// All caches of one client session
pub struct QueryClient {
    pub users: QueryStore<UserProfile>,
    pub posts: QueryStore<Post>,
    pub post_lists: QueryStore<Vec<Post>>,
    pub feed: PagedStore<Post>,
}

impl QueryClient {
    pub fn new(config: &CacheConfig) -> Self {
        let stale_time = config.stale_time();
        Self {
            users: QueryStore::new("users", stale_time, config.max_entries),
            posts: QueryStore::new("posts", stale_time, config.max_entries),
            post_lists: QueryStore::new("post_lists", stale_time, config.max_entries),
            feed: PagedStore::new("feed", stale_time),
        }
    }

    /// Mark one key stale; the next read refetches
    pub async fn invalidate(&self, key: &QueryKey) -> bool {
        let existed = match key {
            QueryKey::CurrentUser => self.users.invalidate(key).await,
            QueryKey::PostById(_) => self.posts.invalidate(key).await,
            QueryKey::RecentPosts | QueryKey::SearchPosts(_) => {
                self.post_lists.invalidate(key).await
            }
            QueryKey::InfinitePosts => self.feed.invalidate(key).await,
        };

        CACHE_INVALIDATIONS_TOTAL
            .with_label_values(&[key.name()])
            .inc();
        tracing::debug!(key = %key, existed, "Invalidated query");
        existed
    }

    /// Apply the invalidations of a successful mutation
    ///
    /// Returns how many of the keys had a cached entry.
    pub async fn apply(&self, mutation: &Mutation) -> usize {
        let keys = mutation.invalidates();
        let mut cached = 0;
        for key in &keys {
            if self.invalidate(key).await {
                cached += 1;
            }
        }
        tracing::debug!(
            mutation = mutation.name(),
            keys = keys.len(),
            cached,
            "Applied mutation"
        );
        cached
    }

    /// Drop every cached value
    pub async fn clear(&self) {
        self.users.clear().await;
        self.posts.clear().await;
        self.post_lists.clear().await;
        self.feed.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &str) -> Post {
        serde_json::from_value(serde_json::json!({
            "$id": id,
            "creator": "u1",
            "caption": "hello",
            "imageId": "f1",
            "imageUrl": "memory://snapgram/files/f1/preview",
            "location": null,
            "tags": [],
            "$createdAt": "2024-01-01T00:00:00Z",
            "$updatedAt": "2024-01-01T00:00:00Z"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn update_mutation_marks_post_and_lists_stale() {
        let client = QueryClient::new(&CacheConfig::default());
        let key = QueryKey::PostById("p1".to_string());

        client
            .posts
            .fetch(&key, || async { Ok(post("p1")) })
            .await
            .unwrap();
        client
            .post_lists
            .fetch(&QueryKey::RecentPosts, || async { Ok(vec![post("p1")]) })
            .await
            .unwrap();
        client
            .post_lists
            .fetch(&QueryKey::search("hello"), || async { Ok(vec![post("p1")]) })
            .await
            .unwrap();

        let cached = client
            .apply(&Mutation::UpdatePost {
                post_id: "p1".to_string(),
            })
            .await;
        // The feed was never loaded
        assert_eq!(cached, 2);

        assert!(client.posts.snapshot(&key).await.is_stale);
        assert!(client.post_lists.snapshot(&QueryKey::RecentPosts).await.is_stale);
        assert!(
            !client
                .post_lists
                .snapshot(&QueryKey::search("hello"))
                .await
                .is_stale
        );
    }

    #[tokio::test]
    async fn clear_empties_every_store() {
        let client = QueryClient::new(&CacheConfig::default());
        client
            .posts
            .fetch(&QueryKey::PostById("p1".to_string()), || async {
                Ok(post("p1"))
            })
            .await
            .unwrap();

        client.clear().await;
        assert!(client.posts.is_empty().await);
        assert!(
            client
                .posts
                .peek(&QueryKey::PostById("p1".to_string()))
                .await
                .is_none()
        );
    }
}
