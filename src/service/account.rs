//! Account service
//!
//! Registration, session handling and current-user lookup.

use std::sync::Arc;

use serde_json::json;

use crate::backend::{Backend, Collection, DocQuery};
use crate::data::{Credentials, EntityId, NewUser, Session, UserProfile};
use crate::error::AppError;
use crate::metrics::observe_backend;
use crate::query::{Mutation, QueryClient, QueryKey};

const MIN_NAME_CHARS: usize = 2;
const MIN_PASSWORD_CHARS: usize = 8;

/// Account service
pub struct AccountService {
    backend: Arc<dyn Backend>,
    queries: Arc<QueryClient>,
}

impl AccountService {
    /// Create new account service
    pub fn new(backend: Arc<dyn Backend>, queries: Arc<QueryClient>) -> Self {
        Self { backend, queries }
    }

    /// Register a new user
    ///
    /// Creates the backend account, then the profile document that links
    /// to it through `accountId`. Does not sign in.
    ///
    /// # Errors
    /// `Validation` for malformed input, `Conflict` if the email is taken
    pub async fn create_account(&self, new_user: NewUser) -> Result<UserProfile, AppError> {
        let name = new_user.name.trim();
        let username = new_user.username.trim();
        let email = new_user.email.trim();
        validate_registration(name, username, email, &new_user.password)?;

        let account_id = EntityId::new().0;
        let account = observe_backend(
            "create_account",
            self.backend
                .create_account(&account_id, email, &new_user.password, name),
        )
        .await?;

        let image_url = self.backend.avatar_initials_url(&account.name);
        let profile_id = EntityId::new().0;
        let document = observe_backend(
            "create_document",
            self.backend.create_document(
                Collection::Users,
                &profile_id,
                json!({
                    "accountId": account.id,
                    "name": account.name,
                    "email": account.email,
                    "username": username,
                    "imageUrl": image_url,
                }),
            ),
        )
        .await?;

        self.queries.apply(&Mutation::CreateAccount).await;
        tracing::info!(account_id = %account.id, username, "Created account");
        document.decode()
    }

    /// Open an email/password session
    pub async fn sign_in(&self, credentials: Credentials) -> Result<Session, AppError> {
        let email = credentials.email.trim();
        if email.is_empty() || credentials.password.is_empty() {
            return Err(AppError::Validation(
                "email and password are required".to_string(),
            ));
        }

        let session = observe_backend(
            "create_email_session",
            self.backend.create_email_session(email, &credentials.password),
        )
        .await?;

        self.queries.apply(&Mutation::SignIn).await;
        tracing::info!(account_id = %session.account_id, "Signed in");
        Ok(session)
    }

    /// Close the current session
    pub async fn sign_out(&self) -> Result<(), AppError> {
        observe_backend(
            "delete_current_session",
            self.backend.delete_current_session(),
        )
        .await?;

        self.queries.apply(&Mutation::SignOut).await;
        tracing::info!("Signed out");
        Ok(())
    }

    /// Profile of the signed-in user, or `None`
    ///
    /// Every failure collapses to `None`; use
    /// [`fetch_current_user`](Self::fetch_current_user) to see why.
    pub async fn current_user(&self) -> Option<Arc<UserProfile>> {
        match self.fetch_current_user().await {
            Ok(profile) => Some(profile),
            Err(AppError::NoSession) => {
                tracing::debug!("No active session");
                None
            }
            Err(error) => {
                tracing::warn!(%error, kind = error.kind().as_str(), "Failed to load current user");
                None
            }
        }
    }

    /// Profile of the signed-in user, cached under the current-user key
    ///
    /// # Errors
    /// `NoSession` without a session, `NotFound` if the account has no
    /// profile document
    pub async fn fetch_current_user(&self) -> Result<Arc<UserProfile>, AppError> {
        self.queries
            .users
            .fetch(&QueryKey::CurrentUser, || self.load_current_user())
            .await
    }

    async fn load_current_user(&self) -> Result<UserProfile, AppError> {
        let account = observe_backend("get_account", self.backend.get_account())
            .await
            .map_err(|error| match error {
                AppError::Unauthorized => AppError::NoSession,
                other => other,
            })?;

        let filter = [DocQuery::equal("accountId", account.id.clone())];
        let profiles = observe_backend(
            "list_documents",
            self.backend.list_documents(Collection::Users, &filter),
        )
        .await?;

        let document = profiles.documents.first().ok_or(AppError::NotFound)?;
        document.decode()
    }
}

fn validate_registration(
    name: &str,
    username: &str,
    email: &str,
    password: &str,
) -> Result<(), AppError> {
    if name.chars().count() < MIN_NAME_CHARS {
        return Err(AppError::Validation(format!(
            "name must be at least {} characters",
            MIN_NAME_CHARS
        )));
    }
    if username.chars().count() < MIN_NAME_CHARS {
        return Err(AppError::Validation(format!(
            "username must be at least {} characters",
            MIN_NAME_CHARS
        )));
    }
    if !is_email(email) {
        return Err(AppError::Validation(format!("invalid email: {}", email)));
    }
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AppError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_CHARS
        )));
    }
    Ok(())
}

fn is_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, MockBackend};
    use crate::config::CacheConfig;
    use crate::error::ErrorKind;

    fn service(backend: Arc<dyn Backend>) -> AccountService {
        AccountService::new(backend, Arc::new(QueryClient::new(&CacheConfig::default())))
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Ada Lovelace".to_string(),
            username: "ada".to_string(),
            email: email.to_string(),
            password: "analytical".to_string(),
        }
    }

    #[test]
    fn email_shape() {
        assert!(is_email("ada@example.com"));
        assert!(!is_email("ada.example.com"));
        assert!(!is_email("@example.com"));
        assert!(!is_email("ada@example"));
        assert!(!is_email("ada@@example.com"));
        assert!(!is_email("a da@example.com"));
    }

    #[tokio::test]
    async fn registration_is_validated_before_any_backend_call() {
        let backend = Arc::new(MemoryBackend::new());
        let accounts = service(backend.clone());

        let mut short_password = new_user("ada@example.com");
        short_password.password = "short".to_string();
        let error = accounts.create_account(short_password).await.unwrap_err();
        assert!(matches!(error, AppError::Validation(_)));

        let mut short_name = new_user("ada@example.com");
        short_name.name = " A ".to_string();
        assert!(accounts.create_account(short_name).await.is_err());

        assert_eq!(backend.request_count("create_account"), 0);
    }

    #[tokio::test]
    async fn create_account_then_sign_in_loads_profile() {
        let backend = Arc::new(MemoryBackend::new());
        let accounts = service(backend.clone());

        let profile = accounts
            .create_account(new_user("ada@example.com"))
            .await
            .unwrap();
        assert_eq!(profile.username, "ada");
        assert!(profile.image_url.contains("AL"));
        assert!(accounts.current_user().await.is_none());

        accounts
            .sign_in(Credentials {
                email: "ada@example.com".to_string(),
                password: "analytical".to_string(),
            })
            .await
            .unwrap();

        let current = accounts.current_user().await.unwrap();
        assert_eq!(current.id, profile.id);
        assert_eq!(current.account_id, profile.account_id);

        // Cached until a session change
        accounts.current_user().await.unwrap();
        assert_eq!(backend.request_count("get_account"), 2);

        accounts.sign_out().await.unwrap();
        assert!(accounts.current_user().await.is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let accounts = service(Arc::new(MemoryBackend::new()));
        accounts
            .create_account(new_user("ada@example.com"))
            .await
            .unwrap();

        let error = accounts
            .create_account(new_user("ada@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(error, AppError::Conflict(_)));
        assert_eq!(error.kind(), ErrorKind::Remote);
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let accounts = service(Arc::new(MemoryBackend::new()));
        accounts
            .create_account(new_user("ada@example.com"))
            .await
            .unwrap();

        let error = accounts
            .sign_in(Credentials {
                email: "ada@example.com".to_string(),
                password: "wrong-password".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(error, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn current_user_without_session_is_none() {
        let accounts = service(Arc::new(MemoryBackend::new()));

        assert!(accounts.current_user().await.is_none());
        let error = accounts.fetch_current_user().await.unwrap_err();
        assert!(matches!(error, AppError::NoSession));
        assert_eq!(error.kind(), ErrorKind::Precondition);
    }

    #[tokio::test]
    async fn transport_failure_collapses_to_none() {
        let mut backend = MockBackend::new();
        backend
            .expect_get_account()
            .returning(|| Err(AppError::Transport("connection reset".to_string())));
        let accounts = service(Arc::new(backend));

        assert!(accounts.current_user().await.is_none());
        let error = accounts.fetch_current_user().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Transport);
    }

    #[tokio::test]
    async fn account_without_profile_is_not_found() {
        let mut backend = MockBackend::new();
        backend.expect_get_account().returning(|| {
            Ok(crate::data::Account {
                id: "acc".to_string(),
                email: "ada@example.com".to_string(),
                name: "Ada".to_string(),
                created_at: chrono::Utc::now(),
            })
        });
        backend.expect_list_documents().returning(|_, _| {
            Ok(crate::backend::DocumentList {
                total: 0,
                documents: Vec::new(),
            })
        });
        let accounts = service(Arc::new(backend));

        let error = accounts.fetch_current_user().await.unwrap_err();
        assert!(matches!(error, AppError::NotFound));
    }
}
