//! Query keys

use std::fmt;

/// Identity of a cached query: operation name plus parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    CurrentUser,
    RecentPosts,
    PostById(String),
    InfinitePosts,
    /// Keyed by the trimmed search term
    SearchPosts(String),
}

impl QueryKey {
    /// Operation name, without parameters
    pub fn name(&self) -> &'static str {
        match self {
            Self::CurrentUser => "getCurrentUser",
            Self::RecentPosts => "getRecentPosts",
            Self::PostById(_) => "getPostById",
            Self::InfinitePosts => "getInfinitePosts",
            Self::SearchPosts(_) => "searchPosts",
        }
    }

    pub fn search(term: &str) -> Self {
        Self::SearchPosts(term.trim().to_string())
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PostById(param) | Self::SearchPosts(param) => {
                write!(f, "{}:{}", self.name(), param)
            }
            _ => f.write_str(self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_parameters() {
        assert_eq!(QueryKey::RecentPosts.to_string(), "getRecentPosts");
        assert_eq!(QueryKey::PostById("p1".into()).to_string(), "getPostById:p1");
        assert_eq!(QueryKey::search("  cats ").to_string(), "searchPosts:cats");
    }
}
