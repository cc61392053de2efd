//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::sync::Arc;

use snapgram::backend::MemoryBackend;
use snapgram::config::{AppConfig, CacheConfig};
use snapgram::data::{Credentials, MediaUpload, NewUser, Post, PostDraft, UserProfile};
use snapgram::{AppState, config};

pub const TEST_PASSWORD: &str = "correct-horse";

/// Client session over an in-memory backend
pub struct TestClient {
    pub state: AppState,
    pub backend: Arc<MemoryBackend>,
}

impl TestClient {
    /// Create a new test client with default cache settings
    pub fn new() -> Self {
        Self::with_cache(CacheConfig::default())
    }

    pub fn with_cache(cache: CacheConfig) -> Self {
        let mut config = AppConfig::in_memory();
        config.cache = cache;
        Self::with_config(config)
    }

    pub fn with_config(config: config::AppConfig) -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let state = AppState::with_backend(config, backend.clone());
        Self { state, backend }
    }

    pub fn new_user(name: &str, email: &str) -> NewUser {
        NewUser {
            name: name.to_string(),
            username: name.to_lowercase().replace(' ', "_"),
            email: email.to_string(),
            password: TEST_PASSWORD.to_string(),
        }
    }

    /// Register and sign in; returns the profile
    pub async fn sign_up_and_in(&self, name: &str, email: &str) -> UserProfile {
        let profile = self
            .state
            .accounts
            .create_account(Self::new_user(name, email))
            .await
            .unwrap();
        self.state
            .accounts
            .sign_in(Credentials {
                email: email.to_string(),
                password: TEST_PASSWORD.to_string(),
            })
            .await
            .unwrap();
        profile
    }

    pub fn image(name: &str) -> MediaUpload {
        MediaUpload {
            file_name: name.to_string(),
            content_type: "image/png".to_string(),
            bytes: vec![0x89, b'P', b'N', b'G'],
        }
    }

    pub async fn create_post(&self, creator: &str, caption: &str) -> Post {
        self.state
            .posts
            .create_post(PostDraft {
                creator: creator.to_string(),
                caption: caption.to_string(),
                file: Some(Self::image("photo.png")),
                location: String::new(),
                tags: String::new(),
            })
            .await
            .unwrap()
    }
}
