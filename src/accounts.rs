//! Account registration, update and removal.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use uuid::Uuid;

use crate::auth::{burn_password_check, hash_password, password_matches};
use crate::errors::AppError;
use crate::models::{RegisterParams, User, ACCOUNTS_SCHEMA, USERS_TABLE};
use crate::store::{Filter, Row, Store};

const MIN_USERNAME_LEN: usize = 3;
const MIN_PASSWORD_LEN: usize = 6;

/// Validate email address
///
/// RFC 5322 simplified: `local@domain.tld` with at least one dot in the domain.
pub fn is_valid_email(email: &str) -> bool {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    let pattern = EMAIL.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
        )
        .unwrap_or_else(|e| panic!("invalid email pattern: {}", e))
    });

    email.len() >= 5 && pattern.is_match(email)
}

fn validate_username(username: &str) -> Result<(), AppError> {
    if username.chars().count() < MIN_USERNAME_LEN {
        return Err(AppError::BadRequest("username too short".to_string()));
    }
    if !username.chars().all(char::is_alphanumeric) {
        return Err(AppError::BadRequest("username must be alphanumeric".to_string()));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest("password too short".to_string()));
    }
    Ok(())
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Account operations over the `accounts.users` table.
pub struct Accounts {
    store: Arc<dyn Store>,
}

impl Accounts {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn find_by(&self, column: &str, value: &str) -> Result<Option<User>, AppError> {
        let filter = Filter::new().eq(column, value);
        self.store
            .get(ACCOUNTS_SCHEMA, USERS_TABLE, &filter)
            .await?
            .into_iter()
            .next()
            .map(User::from_record)
            .transpose()
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        self.find_by("username", username).await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        self.find_by("email", email).await
    }

    /// Creates an account. Marketplace credentials are linked only when all
    /// three are given, Messenger credentials only when all four are.
    pub async fn register(&self, params: &RegisterParams) -> Result<User, AppError> {
        let email = present(&params.email).unwrap_or_default();
        let username = present(&params.username).unwrap_or_default();

        if !is_valid_email(email) {
            return Err(AppError::BadRequest("bad email".to_string()));
        }
        validate_username(username)?;
        let password = params
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::BadRequest("password must be entered".to_string()))?;
        validate_password(password)?;

        if let Some(duplicate) = self.already_registered(email, username).await? {
            return Err(duplicate);
        }

        let mut row = Row::new()
            .with("user_id", Uuid::new_v4().to_string())
            .with("username", username)
            .with("email", email)
            .with("password", hash_password(password)?);

        if let Some(phone) = present(&params.phone_number) {
            row.set("phone_number", phone);
        }

        let thumbtack = [
            ("thumbtack_user_id", present(&params.thumbtack_user_id)),
            ("thumbtack_password", present(&params.thumbtack_password)),
            ("thumbtack_business_id", present(&params.thumbtack_business_id)),
        ];
        if thumbtack.iter().all(|(_, v)| v.is_some()) {
            for (column, value) in thumbtack {
                row.set(column, value);
            }
        }

        let facebook = [
            ("fb_app_id", present(&params.fb_app_id)),
            ("fb_page_id", present(&params.fb_page_id)),
            ("fb_page_access_token", present(&params.fb_page_access_token)),
            ("fb_secret_key", present(&params.fb_secret_key)),
        ];
        if facebook.iter().all(|(_, v)| v.is_some()) {
            for (column, value) in facebook {
                row.set(column, value);
            }
        }

        match self.store.insert(ACCOUNTS_SCHEMA, USERS_TABLE, &row).await {
            Ok(()) => {}
            // Lost a race with a concurrent registration.
            Err(e) if e.is_unique_violation() => {
                tracing::warn!("Concurrent registration collided for {}", username);
                return Err(self
                    .already_registered(email, username)
                    .await?
                    .unwrap_or_else(|| AppError::BadRequest("account already registered".to_string())));
            }
            Err(e) => return Err(e),
        }
        tracing::info!("Registered user {}", username);

        self.find_by_username(username)
            .await?
            .ok_or_else(|| AppError::InternalError(format!("user {} vanished after insert", username)))
    }

    async fn already_registered(
        &self,
        email: &str,
        username: &str,
    ) -> Result<Option<AppError>, AppError> {
        if self.find_by_email(email).await?.is_some() {
            return Ok(Some(AppError::BadRequest("email already registered".to_string())));
        }
        if self.find_by_username(username).await?.is_some() {
            return Ok(Some(AppError::BadRequest("username already registered".to_string())));
        }
        Ok(None)
    }

    /// Resolves the account named by `email` (preferred) or `username` and
    /// checks `password` against it.
    async fn authenticate(&self, params: &RegisterParams) -> Result<User, AppError> {
        let password = params
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::BadRequest("must enter password".to_string()))?;

        let user = if let Some(email) = present(&params.email) {
            self.find_by_email(email).await?
        } else if let Some(username) = present(&params.username) {
            self.find_by_username(username).await?
        } else {
            return Err(AppError::BadRequest("must enter email or username".to_string()));
        };

        // Unknown accounts get the same answer, and the same hashing cost, as wrong passwords.
        match user {
            Some(user) if password_matches(password, &user.password_hash) => Ok(user),
            Some(_) => Err(AppError::BadRequest(
                "password does not match registered user".to_string(),
            )),
            None => {
                burn_password_check(password);
                Err(AppError::BadRequest(
                    "password does not match registered user".to_string(),
                ))
            }
        }
    }

    /// Updates whitelisted columns of the authenticated account. The account
    /// is looked up by the identifier given, so that identifier itself is not
    /// changed by this call; `new_password` rotates the password.
    pub async fn update(&self, params: &RegisterParams) -> Result<u64, AppError> {
        let user = self.authenticate(params).await?;
        let lookup_column = if present(&params.email).is_some() {
            "email"
        } else {
            "username"
        };

        // Columns a PUT may change besides the password.
        let supplied = [
            ("email", &params.email),
            ("username", &params.username),
            ("phone_number", &params.phone_number),
            ("thumbtack_user_id", &params.thumbtack_user_id),
            ("thumbtack_password", &params.thumbtack_password),
            ("thumbtack_business_id", &params.thumbtack_business_id),
            ("fb_app_id", &params.fb_app_id),
            ("fb_page_id", &params.fb_page_id),
            ("fb_page_access_token", &params.fb_page_access_token),
            ("fb_secret_key", &params.fb_secret_key),
        ];

        let mut values = Row::new();
        for (column, value) in supplied {
            if column == lookup_column {
                continue;
            }
            let Some(value) = present(value) else {
                continue;
            };
            match column {
                "email" if !is_valid_email(value) => {
                    return Err(AppError::BadRequest("bad email".to_string()))
                }
                "username" => validate_username(value)?,
                _ => {}
            }
            values.set(column, value);
        }

        if let Some(new_password) = params.new_password.as_deref().filter(|p| !p.is_empty()) {
            validate_password(new_password)?;
            values.set("password", hash_password(new_password)?);
        }

        if values.is_empty() {
            return Err(AppError::BadRequest("nothing to update".to_string()));
        }

        let filter = Filter::new().eq("user_id", user.user_id.as_str());
        let changed = self
            .store
            .update(ACCOUNTS_SCHEMA, USERS_TABLE, &values, &filter)
            .await?;
        tracing::info!("Updated {} column(s) for {}", values.len(), user.username);
        Ok(changed)
    }

    /// Removes the authenticated account.
    pub async fn delete(&self, params: &RegisterParams) -> Result<u64, AppError> {
        let user = self.authenticate(params).await?;
        let filter = Filter::new().eq("user_id", user.user_id.as_str());
        let removed = self.store.delete(ACCOUNTS_SCHEMA, USERS_TABLE, &filter).await?;
        tracing::info!("Deleted user {}", user.username);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;

    fn params(email: &str, username: &str, password: &str) -> RegisterParams {
        RegisterParams {
            email: Some(email.to_string()),
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("potato@example.com"));
        assert!(is_valid_email("first.last+tag@mail.example.co"));
        assert!(!is_valid_email("potato@localhost"));
        assert!(!is_valid_email("potato.example.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email(""));
    }

    #[tokio::test]
    async fn register_validates_in_order() {
        let accounts = Accounts::new(Arc::new(MemoryStore::with_service_schema()));

        let cases = [
            (params("nope", "potato", "hunter22"), "bad email"),
            (params("p@example.com", "po", "hunter22"), "username too short"),
            (params("p@example.com", "potato", ""), "password must be entered"),
            (params("p@example.com", "potato", "short"), "password too short"),
            (params("p@example.com", "pot_ato", "hunter22"), "username must be alphanumeric"),
        ];
        for (input, expected) in cases {
            match accounts.register(&input).await {
                Err(AppError::BadRequest(msg)) => assert_eq!(msg, expected),
                other => panic!("expected {:?}, got {:?}", expected, other.map(|u| u.username)),
            }
        }
    }

    #[tokio::test]
    async fn partial_credentials_are_not_linked() {
        let accounts = Accounts::new(Arc::new(MemoryStore::with_service_schema()));
        let mut input = params("p@example.com", "potato", "hunter22");
        input.thumbtack_user_id = Some("tt-user".to_string());
        input.thumbtack_business_id = Some("437282430088732672".to_string());
        input.fb_app_id = Some("app".to_string());
        input.fb_page_id = Some("103603665458708".to_string());
        input.fb_page_access_token = Some("token".to_string());
        input.fb_secret_key = Some("secret".to_string());

        let user = accounts.register(&input).await.unwrap();

        assert_eq!(user.thumbtack_business_id, None);
        assert_eq!(user.fb_page_id.as_deref(), Some("103603665458708"));
        assert_ne!(user.password_hash, "hunter22");
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let accounts = Accounts::new(Arc::new(MemoryStore::with_service_schema()));
        accounts
            .register(&params("a@example.com", "potato", "hunter22"))
            .await
            .unwrap();

        let err = accounts
            .register(&params("b@example.com", "potato", "hunter22"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref msg) if msg == "username already registered"));
    }

    /// Hides existing rows from the first `blind_reads` lookups, as a
    /// registration racing another one would see them.
    struct RacingStore {
        inner: MemoryStore,
        blind_reads: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Store for RacingStore {
        async fn get(
            &self,
            schema: &str,
            table: &str,
            filter: &Filter,
        ) -> Result<Vec<crate::store::Record>, AppError> {
            let rows = self.inner.get(schema, table, filter).await?;
            let blind = self
                .blind_reads
                .fetch_update(
                    std::sync::atomic::Ordering::SeqCst,
                    std::sync::atomic::Ordering::SeqCst,
                    |n| n.checked_sub(1),
                )
                .is_ok();
            Ok(if blind { Vec::new() } else { rows })
        }

        async fn insert(&self, schema: &str, table: &str, row: &Row) -> Result<(), AppError> {
            self.inner.insert(schema, table, row).await
        }

        async fn update(
            &self,
            schema: &str,
            table: &str,
            values: &Row,
            filter: &Filter,
        ) -> Result<u64, AppError> {
            self.inner.update(schema, table, values, filter).await
        }

        async fn delete(&self, schema: &str, table: &str, filter: &Filter) -> Result<u64, AppError> {
            self.inner.delete(schema, table, filter).await
        }

        async fn count_grouped(
            &self,
            query: &crate::store::CountQuery,
        ) -> Result<Vec<crate::store::GroupedCount>, AppError> {
            self.inner.count_grouped(query).await
        }
    }

    #[tokio::test]
    async fn concurrent_duplicate_username_is_a_bad_request() {
        let store = Arc::new(RacingStore {
            inner: MemoryStore::with_service_schema(),
            blind_reads: std::sync::atomic::AtomicUsize::new(0),
        });
        let accounts = Accounts::new(store.clone());
        accounts
            .register(&params("a@example.com", "potato", "hunter22"))
            .await
            .unwrap();

        // Both pre-insert lookups miss, so the insert hits the unique constraint.
        store.blind_reads.store(2, std::sync::atomic::Ordering::SeqCst);
        let err = accounts
            .register(&params("b@example.com", "potato", "hunter22"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::BadRequest(ref msg) if msg == "username already registered"));
        assert_eq!(store.inner.rows("accounts", "users").len(), 1);
    }

    #[tokio::test]
    async fn unknown_account_gets_the_wrong_password_answer() {
        let accounts = Accounts::new(Arc::new(MemoryStore::with_service_schema()));
        let missing = RegisterParams {
            username: Some("nobody".to_string()),
            password: Some("hunter22".to_string()),
            ..Default::default()
        };

        match accounts.delete(&missing).await {
            Err(AppError::BadRequest(msg)) => {
                assert_eq!(msg, "password does not match registered user")
            }
            other => panic!("expected BadRequest, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn update_rotates_password_and_ignores_lookup_column() {
        let accounts = Accounts::new(Arc::new(MemoryStore::with_service_schema()));
        accounts
            .register(&params("a@example.com", "potato", "hunter22"))
            .await
            .unwrap();

        let update = RegisterParams {
            username: Some("potato".to_string()),
            password: Some("hunter22".to_string()),
            new_password: Some("correcthorse".to_string()),
            phone_number: Some("5550100".to_string()),
            ..Default::default()
        };
        assert_eq!(accounts.update(&update).await.unwrap(), 1);

        let user = accounts.find_by_username("potato").await.unwrap().unwrap();
        assert_eq!(user.phone_number.as_deref(), Some("5550100"));
        assert!(password_matches("correcthorse", &user.password_hash));
    }

    #[tokio::test]
    async fn delete_requires_matching_password() {
        let accounts = Accounts::new(Arc::new(MemoryStore::with_service_schema()));
        accounts
            .register(&params("a@example.com", "potato", "hunter22"))
            .await
            .unwrap();

        let wrong = RegisterParams {
            email: Some("a@example.com".to_string()),
            password: Some("wrong-password".to_string()),
            ..Default::default()
        };
        assert!(accounts.delete(&wrong).await.is_err());

        let right = RegisterParams {
            password: Some("hunter22".to_string()),
            ..wrong
        };
        assert_eq!(accounts.delete(&right).await.unwrap(), 1);
        assert!(accounts.find_by_email("a@example.com").await.unwrap().is_none());
    }
}
