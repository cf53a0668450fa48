use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// Account record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String, // Argon2 hash, never serialized
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
    pub refresh_token: Option<String>, // single active session per account
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
}

/// Credential store seam. The service layer only ever talks to this trait,
/// so the same flows run against Postgres in production and the in-memory
/// store in tests.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    /// Look up by username or email, whichever matches.
    async fn find_by_login(&self, identifier: &str) -> anyhow::Result<Option<User>>;
    async fn username_or_email_exists(&self, username: &str, email: &str) -> anyhow::Result<bool>;
    /// True when another account already owns `username`.
    async fn username_taken(&self, username: &str, excluding: Uuid) -> anyhow::Result<bool>;
    async fn create(&self, new_user: NewUser) -> anyhow::Result<User>;
    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> anyhow::Result<()>;
    /// Compare-and-set rotation: replaces the stored refresh token with
    /// `next` only while it still equals `expected`. Returns false when a
    /// concurrent rotation or a logout got there first.
    async fn swap_refresh_token(&self, id: Uuid, expected: &str, next: &str)
        -> anyhow::Result<bool>;
    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()>;
    async fn update_account(
        &self,
        id: Uuid,
        full_name: &str,
        username: &str,
    ) -> anyhow::Result<Option<User>>;
    async fn set_avatar_url(&self, id: Uuid, url: &str) -> anyhow::Result<Option<User>>;
    async fn set_cover_image_url(&self, id: Uuid, url: &str) -> anyhow::Result<Option<User>>;
}

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, full_name, password_hash, avatar_url,
                   cover_image_url, refresh_token, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_login(&self, identifier: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, full_name, password_hash, avatar_url,
                   cover_image_url, refresh_token, created_at, updated_at
            FROM users
            WHERE username = $1 OR email = $1
            "#,
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn username_or_email_exists(&self, username: &str, email: &str) -> anyhow::Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(SELECT 1 FROM users WHERE username = $1 OR email = $2)
            "#,
        )
        .bind(username)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn username_taken(&self, username: &str, excluding: Uuid) -> anyhow::Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(SELECT 1 FROM users WHERE username = $1 AND id <> $2)
            "#,
        )
        .bind(username)
        .bind(excluding)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn create(&self, new_user: NewUser) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, full_name, password_hash, avatar_url, cover_image_url)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, username, email, full_name, password_hash, avatar_url,
                      cover_image_url, refresh_token, created_at, updated_at
            "#,
        )
        .bind(&new_user.username)
        .bind(&new_user.email)
        .bind(&new_user.full_name)
        .bind(&new_user.password_hash)
        .bind(&new_user.avatar_url)
        .bind(&new_user.cover_image_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET refresh_token = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn swap_refresh_token(
        &self,
        id: Uuid,
        expected: &str,
        next: &str,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET refresh_token = $3, updated_at = now()
            WHERE id = $1 AND refresh_token = $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(next)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_account(
        &self,
        id: Uuid,
        full_name: &str,
        username: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET full_name = $2, username = $3, updated_at = now()
            WHERE id = $1
            RETURNING id, username, email, full_name, password_hash, avatar_url,
                      cover_image_url, refresh_token, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(full_name)
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn set_avatar_url(&self, id: Uuid, url: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET avatar_url = $2, updated_at = now()
            WHERE id = $1
            RETURNING id, username, email, full_name, password_hash, avatar_url,
                      cover_image_url, refresh_token, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn set_cover_image_url(&self, id: Uuid, url: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET cover_image_url = $2, updated_at = now()
            WHERE id = $1
            RETURNING id, username, email, full_name, password_hash, avatar_url,
                      cover_image_url, refresh_token, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}

/// In-memory store backing `AppState::fake()`. Mirrors the Postgres
/// semantics closely enough for the session flows, including the unique
/// constraints and the conditional refresh-token swap.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_login(&self, identifier: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.username == identifier || u.email == identifier)
            .cloned())
    }

    async fn username_or_email_exists(&self, username: &str, email: &str) -> anyhow::Result<bool> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .any(|u| u.username == username || u.email == email))
    }

    async fn username_taken(&self, username: &str, excluding: Uuid) -> anyhow::Result<bool> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .any(|u| u.username == username && u.id != excluding))
    }

    async fn create(&self, new_user: NewUser) -> anyhow::Result<User> {
        let mut users = self.users.lock().unwrap();
        anyhow::ensure!(
            !users
                .values()
                .any(|u| u.username == new_user.username || u.email == new_user.email),
            "unique constraint violated on users"
        );
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            username: new_user.username,
            email: new_user.email,
            full_name: new_user.full_name,
            password_hash: new_user.password_hash,
            avatar_url: new_user.avatar_url,
            cover_image_url: new_user.cover_image_url,
            refresh_token: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> anyhow::Result<()> {
        if let Some(user) = self.users.lock().unwrap().get_mut(&id) {
            user.refresh_token = token.map(str::to_string);
            user.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn swap_refresh_token(
        &self,
        id: Uuid,
        expected: &str,
        next: &str,
    ) -> anyhow::Result<bool> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(&id) {
            Some(user) if user.refresh_token.as_deref() == Some(expected) => {
                user.refresh_token = Some(next.to_string());
                user.updated_at = OffsetDateTime::now_utc();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        if let Some(user) = self.users.lock().unwrap().get_mut(&id) {
            user.password_hash = password_hash.to_string();
            user.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn update_account(
        &self,
        id: Uuid,
        full_name: &str,
        username: &str,
    ) -> anyhow::Result<Option<User>> {
        let mut users = self.users.lock().unwrap();
        Ok(users.get_mut(&id).map(|user| {
            user.full_name = full_name.to_string();
            user.username = username.to_string();
            user.updated_at = OffsetDateTime::now_utc();
            user.clone()
        }))
    }

    async fn set_avatar_url(&self, id: Uuid, url: &str) -> anyhow::Result<Option<User>> {
        let mut users = self.users.lock().unwrap();
        Ok(users.get_mut(&id).map(|user| {
            user.avatar_url = url.to_string();
            user.updated_at = OffsetDateTime::now_utc();
            user.clone()
        }))
    }

    async fn set_cover_image_url(&self, id: Uuid, url: &str) -> anyhow::Result<Option<User>> {
        let mut users = self.users.lock().unwrap();
        Ok(users.get_mut(&id).map(|user| {
            user.cover_image_url = Some(url.to_string());
            user.updated_at = OffsetDateTime::now_utc();
            user.clone()
        }))
    }
}

#[cfg(test)]
impl MemoryUserStore {
    pub fn len(&self) -> usize {
        self.users.lock().unwrap().len()
    }
}

#[cfg(test)]
impl User {
    pub fn sample(username: &str, email: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            full_name: format!("{username} Sample"),
            password_hash: "$argon2id$unused".to_string(),
            avatar_url: "https://media.test/cliptube-media/avatars/seed.jpg".to_string(),
            cover_image_url: None,
            refresh_token: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: email.into(),
            full_name: "Test User".into(),
            password_hash: "hash".into(),
            avatar_url: "https://media.test/cliptube-media/avatars/a.jpg".into(),
            cover_image_url: None,
        }
    }

    #[tokio::test]
    async fn memory_store_enforces_uniqueness() {
        let store = MemoryUserStore::default();
        store.create(new_user("ada", "ada@example.com")).await.unwrap();

        assert!(store.create(new_user("ada", "other@example.com")).await.is_err());
        assert!(store.create(new_user("other", "ada@example.com")).await.is_err());
        assert!(store
            .username_or_email_exists("ada", "nobody@example.com")
            .await
            .unwrap());
        assert!(!store
            .username_or_email_exists("nobody", "nobody@example.com")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn find_by_login_matches_username_and_email() {
        let store = MemoryUserStore::default();
        let created = store.create(new_user("ada", "ada@example.com")).await.unwrap();

        let by_name = store.find_by_login("ada").await.unwrap().unwrap();
        let by_email = store.find_by_login("ada@example.com").await.unwrap().unwrap();
        assert_eq!(by_name.id, created.id);
        assert_eq!(by_email.id, created.id);
        assert!(store.find_by_login("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn swap_refresh_token_is_conditional() {
        let store = MemoryUserStore::default();
        let user = store.create(new_user("ada", "ada@example.com")).await.unwrap();
        store.set_refresh_token(user.id, Some("first")).await.unwrap();

        assert!(store.swap_refresh_token(user.id, "first", "second").await.unwrap());
        // The old value is spent; a replay of it must lose.
        assert!(!store.swap_refresh_token(user.id, "first", "third").await.unwrap());
        assert!(store.swap_refresh_token(user.id, "second", "third").await.unwrap());

        store.set_refresh_token(user.id, None).await.unwrap();
        assert!(!store.swap_refresh_token(user.id, "third", "fourth").await.unwrap());
    }

    #[tokio::test]
    async fn username_taken_ignores_the_owner() {
        let store = MemoryUserStore::default();
        let ada = store.create(new_user("ada", "ada@example.com")).await.unwrap();
        let bob = store.create(new_user("bob", "bob@example.com")).await.unwrap();

        // Keeping your own username is not a conflict; taking someone else's is.
        assert!(!store.username_taken("ada", ada.id).await.unwrap());
        assert!(store.username_taken("ada", bob.id).await.unwrap());
        assert!(!store.username_taken("fresh", bob.id).await.unwrap());
    }
}
