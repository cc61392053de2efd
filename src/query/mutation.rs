//! Mutations and the cache keys they make stale
//!
//! Invalidation is declared here, per mutation, and nowhere else. A
//! mutation that does not list a key leaves it alone; readers of such
//! keys accept staleness until the entry ages out.

use super::QueryKey;

/// A write against the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateAccount,
    SignIn,
    SignOut,
    CreatePost,
    UpdatePost { post_id: String },
    DeletePost { post_id: String },
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateAccount => "createAccount",
            Self::SignIn => "signIn",
            Self::SignOut => "signOut",
            Self::CreatePost => "createPost",
            Self::UpdatePost { .. } => "updatePost",
            Self::DeletePost { .. } => "deletePost",
        }
    }

    /// Keys that must refetch once this mutation succeeds
    ///
    /// Search results are never listed: they are keyed per term and
    /// tolerate staleness.
    pub fn invalidates(&self) -> Vec<QueryKey> {
        match self {
            Self::CreateAccount => Vec::new(),
            Self::SignIn | Self::SignOut => vec![QueryKey::CurrentUser],
            Self::CreatePost => vec![QueryKey::RecentPosts, QueryKey::InfinitePosts],
            Self::UpdatePost { post_id } | Self::DeletePost { post_id } => vec![
                QueryKey::PostById(post_id.clone()),
                QueryKey::RecentPosts,
                QueryKey::InfinitePosts,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_post_invalidates_listings() {
        let keys = Mutation::CreatePost.invalidates();
        assert!(keys.contains(&QueryKey::RecentPosts));
        assert!(keys.contains(&QueryKey::InfinitePosts));
    }

    #[test]
    fn update_post_invalidates_the_post_and_listings() {
        let keys = Mutation::UpdatePost {
            post_id: "p1".to_string(),
        }
        .invalidates();
        assert_eq!(
            keys,
            vec![
                QueryKey::PostById("p1".to_string()),
                QueryKey::RecentPosts,
                QueryKey::InfinitePosts,
            ]
        );
    }

    #[test]
    fn names_match_operations() {
        assert_eq!(Mutation::SignIn.name(), "signIn");
        assert_eq!(
            Mutation::DeletePost {
                post_id: "p".to_string()
            }
            .name(),
            "deletePost"
        );
    }

    #[test]
    fn no_mutation_touches_search() {
        let all = [
            Mutation::CreateAccount,
            Mutation::SignIn,
            Mutation::SignOut,
            Mutation::CreatePost,
            Mutation::UpdatePost {
                post_id: "p".to_string(),
            },
            Mutation::DeletePost {
                post_id: "p".to_string(),
            },
        ];
        for mutation in all {
            assert!(
                !mutation
                    .invalidates()
                    .iter()
                    .any(|key| matches!(key, QueryKey::SearchPosts(_)))
            );
        }
    }
}
