use chrono::{Duration, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, QueryTrait, Set, SqlErr,
};
use uuid::Uuid;

use crate::entity::media_server::{self, ServerType};
use crate::entity::user::{self, Provider, UserType};
use crate::error::{ResolveError, ResolveResult};
use crate::password::{self, VerifyFn};
use crate::payload::ProviderPayload;

/// Canonical form of a federated identity, stored in `users.federation_key`.
pub fn federation_key(provider: Provider, server_id: Uuid, provider_user_id: &str) -> String {
    format!("{}:{}:{}", provider.as_str(), server_id, provider_user_id)
}

/// Compare-and-set rounds in [`IdentityResolver::touch_last_login`] before
/// giving up to a concurrent writer.
const TOUCH_ATTEMPTS: usize = 5;

/// Profile data for one federated login, written verbatim on every resolve.
struct FederatedLogin<'a> {
    provider: Provider,
    provider_user_id: &'a str,
    server_id: Uuid,
    username: &'a str,
    email: Option<&'a str>,
    thumb: Option<&'a str>,
    is_home_user: bool,
}

/// Maps provider logins and local credentials onto canonical user rows.
#[derive(Clone)]
pub struct IdentityResolver {
    db: DatabaseConnection,
    verify: VerifyFn,
}

impl IdentityResolver {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            verify: password::verify_password,
        }
    }

    /// Replace the password check used by [`Self::find_user_by_credentials`].
    pub fn with_verifier(mut self, verify: VerifyFn) -> Self {
        self.verify = verify;
        self
    }

    /// Expose the underlying DB connection for direct SeaORM queries.
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    // ---------- servers ----------

    /// Exact-match lookup; the URI is not normalized.
    pub async fn find_server_by_uri(
        &self,
        uri: &str,
        server_type: ServerType,
    ) -> ResolveResult<Option<media_server::Model>> {
        let server = media_server::Entity::find()
            .filter(media_server::Column::BaseUri.eq(uri))
            .filter(media_server::Column::ServerType.eq(server_type))
            .one(&self.db)
            .await?;
        Ok(server)
    }

    pub async fn list_servers_by_type(
        &self,
        server_type: ServerType,
    ) -> ResolveResult<Vec<media_server::Model>> {
        let servers = media_server::Entity::find()
            .filter(media_server::Column::ServerType.eq(server_type))
            .order_by_asc(media_server::Column::CreatedAt)
            .all(&self.db)
            .await?;
        Ok(servers)
    }

    /// Enabled servers of any type other than `local`.
    pub async fn list_enabled_media_servers(&self) -> ResolveResult<Vec<media_server::Model>> {
        let servers = media_server::Entity::find()
            .filter(media_server::Column::ServerType.ne(ServerType::Local))
            .filter(media_server::Column::IsEnabled.eq(true))
            .order_by_asc(media_server::Column::CreatedAt)
            .all(&self.db)
            .await?;
        Ok(servers)
    }

    // ---------- federated users ----------

    /// Find or create the Plex user for `(provider_user_id, server_id)` and
    /// overwrite its profile with the supplied values.
    ///
    /// A missing `thumb` clears the stored avatar and a missing
    /// `is_home_user` stores `false`: the latest login always wins.
    pub async fn resolve_plex_user(
        &self,
        provider_user_id: &str,
        server_id: Uuid,
        username: &str,
        email: Option<&str>,
        thumb: Option<&str>,
        is_home_user: Option<bool>,
    ) -> ResolveResult<user::Model> {
        let login = FederatedLogin {
            provider: Provider::Plex,
            provider_user_id,
            server_id,
            username,
            email,
            thumb,
            is_home_user: is_home_user.unwrap_or(false),
        };
        self.upsert_federated(
            login,
            &[
                user::Column::Username,
                user::Column::Email,
                user::Column::Thumb,
                user::Column::IsHomeUser,
            ],
        )
        .await
    }

    /// Same as [`Self::resolve_plex_user`] for any federated provider, but
    /// only username and email are refreshed.
    pub async fn resolve_media_user(
        &self,
        provider_user_id: &str,
        server_id: Uuid,
        username: &str,
        email: Option<&str>,
        provider: Provider,
    ) -> ResolveResult<user::Model> {
        if !provider.is_federated() {
            return Err(ResolveError::UnsupportedProvider(provider));
        }
        let login = FederatedLogin {
            provider,
            provider_user_id,
            server_id,
            username,
            email,
            thumb: None,
            is_home_user: false,
        };
        self.upsert_federated(login, &[user::Column::Username, user::Column::Email])
            .await
    }

    /// Insert a user straight from a provider payload.
    ///
    /// No existence check and no federation key: two calls with the same
    /// payload produce two rows. The first later resolve of the same
    /// identity claims the oldest of them, so logins land on the imported
    /// row instead of adding another.
    pub async fn create_media_user_from_provider_payload(
        &self,
        payload: &ProviderPayload,
        server: &media_server::Model,
        provider: Provider,
    ) -> ResolveResult<user::Model> {
        if !provider.is_federated() {
            return Err(ResolveError::UnsupportedProvider(provider));
        }

        let now = Utc::now().naive_utc();
        let created = user::ActiveModel {
            id: Set(Uuid::now_v7()),
            username: Set(payload.username.clone()),
            email: Set(payload.email.clone()),
            provider: Set(provider),
            provider_user_id: Set(Some(payload.id.clone())),
            server_id: Set(Some(server.id)),
            user_type: Set(UserType::MediaUser),
            password_hash: Set(None),
            thumb: Set(payload.thumb.clone()),
            is_home_user: Set(false),
            last_login_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            federation_key: Set(None),
            local_username: Set(None),
        }
        .insert(&self.db)
        .await?;

        tracing::info!(
            user_id = %created.id,
            provider = provider.as_str(),
            provider_user_id = %payload.id,
            server_id = %server.id,
            "Created media user from provider payload"
        );
        Ok(created)
    }

    /// One atomic write keyed on the federation key, then a read of the
    /// committed row. Concurrent first logins converge on a single row.
    async fn upsert_federated(
        &self,
        login: FederatedLogin<'_>,
        refresh: &[user::Column],
    ) -> ResolveResult<user::Model> {
        let key = federation_key(login.provider, login.server_id, login.provider_user_id);
        self.claim_imported_row(&login, &key).await?;

        let now = Utc::now().naive_utc();
        let candidate_id = Uuid::now_v7();

        let row = user::ActiveModel {
            id: Set(candidate_id),
            username: Set(login.username.to_owned()),
            email: Set(login.email.map(str::to_owned)),
            provider: Set(login.provider),
            provider_user_id: Set(Some(login.provider_user_id.to_owned())),
            server_id: Set(Some(login.server_id)),
            user_type: Set(UserType::MediaUser),
            password_hash: Set(None),
            thumb: Set(login.thumb.map(str::to_owned)),
            is_home_user: Set(login.is_home_user),
            last_login_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            federation_key: Set(Some(key.clone())),
            local_username: Set(None),
        };

        let on_conflict = OnConflict::column(user::Column::FederationKey)
            .update_columns(
                refresh
                    .iter()
                    .copied()
                    .chain(std::iter::once(user::Column::UpdatedAt)),
            )
            .to_owned();

        user::Entity::insert(row)
            .on_conflict(on_conflict)
            .exec_without_returning(&self.db)
            .await?;

        let resolved = user::Entity::find()
            .filter(user::Column::FederationKey.eq(key.as_str()))
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                ResolveError::Store(DbErr::RecordNotFound(format!(
                    "user row for {key} vanished after upsert"
                )))
            })?;

        let created = resolved.id == candidate_id;
        tracing::info!(
            user_id = %resolved.id,
            provider = login.provider.as_str(),
            provider_user_id = %login.provider_user_id,
            server_id = %login.server_id,
            created,
            "Resolved federated user"
        );
        Ok(resolved)
    }

    /// Give `key` to the oldest keyless row for the same identity, unless
    /// some row already holds it. Losing that race to another writer is
    /// fine: the upsert that follows lands on the winner's row.
    async fn claim_imported_row(
        &self,
        login: &FederatedLogin<'_>,
        key: &str,
    ) -> ResolveResult<()> {
        let oldest_keyless = user::Entity::find()
            .select_only()
            .column(user::Column::Id)
            .filter(user::Column::Provider.eq(login.provider))
            .filter(user::Column::ProviderUserId.eq(login.provider_user_id))
            .filter(user::Column::ServerId.eq(login.server_id))
            .filter(user::Column::FederationKey.is_null())
            .order_by_asc(user::Column::CreatedAt)
            .order_by_asc(user::Column::Id)
            .limit(1)
            .into_query();
        let key_holder = user::Entity::find()
            .select_only()
            .column(user::Column::Id)
            .filter(user::Column::FederationKey.eq(key))
            .into_query();

        let claimed = user::Entity::update_many()
            .col_expr(user::Column::FederationKey, Expr::value(key))
            .filter(user::Column::Id.in_subquery(oldest_keyless))
            .filter(user::Column::FederationKey.is_null())
            .filter(Expr::exists(key_holder).not())
            .exec(&self.db)
            .await;

        match claimed {
            Ok(res) if res.rows_affected > 0 => {
                tracing::info!(federation_key = %key, "Claimed imported user row");
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ---------- local users ----------

    /// Return the local account only if `password` verifies against its
    /// stored hash. Unknown usernames and wrong passwords both yield `None`.
    pub async fn find_user_by_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> ResolveResult<Option<user::Model>> {
        let Some(user) = user::Entity::find()
            .filter(user::Column::LocalUsername.eq(username))
            .filter(user::Column::PasswordHash.is_not_null())
            .one(&self.db)
            .await?
        else {
            tracing::debug!(username = %username, "Credential lookup: no local account");
            return Ok(None);
        };

        let verified = user
            .password_hash
            .as_deref()
            .is_some_and(|hash| (self.verify)(password, hash));
        if !verified {
            tracing::debug!(username = %username, "Credential lookup: password mismatch");
            return Ok(None);
        }
        Ok(Some(user))
    }

    /// Stamp `last_login_at` with the current time and bump `updated_at`.
    ///
    /// Only the id of `user` is used. The new stamp is always later than the
    /// stored one, even if `user` is stale or the stored value lies in the
    /// future; if the clock has not moved past it the stamp is bumped by a
    /// microsecond.
    pub async fn touch_last_login(&self, user: &user::Model) -> ResolveResult<()> {
        for _ in 0..TOUCH_ATTEMPTS {
            let stored = user::Entity::find_by_id(user.id)
                .one(&self.db)
                .await?
                .ok_or_else(|| {
                    ResolveError::Store(DbErr::RecordNotFound(format!("user {}", user.id)))
                })?;

            let now = Utc::now().naive_utc();
            let stamp = match stored.last_login_at {
                Some(previous) if now <= previous => previous + Duration::microseconds(1),
                _ => now,
            };

            let res = user::Entity::update_many()
                .col_expr(user::Column::LastLoginAt, Expr::value(stamp))
                .col_expr(user::Column::UpdatedAt, Expr::value(now))
                .filter(user::Column::Id.eq(user.id))
                .filter(
                    Condition::any()
                        .add(user::Column::LastLoginAt.is_null())
                        .add(user::Column::LastLoginAt.lt(stamp)),
                )
                .exec(&self.db)
                .await?;

            if res.rows_affected > 0 {
                tracing::debug!(user_id = %user.id, last_login_at = %stamp, "Touched last login");
                return Ok(());
            }
        }

        tracing::warn!(user_id = %user.id, "Gave up touching last login under contention");
        Err(ResolveError::Store(DbErr::RecordNotUpdated))
    }

    // ---------- reads ----------

    pub async fn find_user_by_id(&self, id: Uuid) -> ResolveResult<Option<user::Model>> {
        Ok(user::Entity::find_by_id(id).one(&self.db).await?)
    }

    pub async fn list_users_for_server(&self, server_id: Uuid) -> ResolveResult<Vec<user::Model>> {
        let users = user::Entity::find()
            .filter(user::Column::ServerId.eq(server_id))
            .order_by_asc(user::Column::CreatedAt)
            .all(&self.db)
            .await?;
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{Database, PaginatorTrait};

    async fn setup() -> IdentityResolver {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        IdentityResolver::new(db)
    }

    async fn insert_server(
        resolver: &IdentityResolver,
        uri: &str,
        server_type: ServerType,
        is_enabled: bool,
    ) -> media_server::Model {
        let now = Utc::now().naive_utc();
        media_server::ActiveModel {
            id: Set(Uuid::now_v7()),
            name: Set(format!("{} at {uri}", server_type.as_str())),
            base_uri: Set(uri.to_string()),
            server_type: Set(server_type),
            is_enabled: Set(is_enabled),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(resolver.db())
        .await
        .unwrap()
    }

    async fn insert_local_user(resolver: &IdentityResolver, username: &str, password: &str) {
        let now = Utc::now().naive_utc();
        user::ActiveModel {
            id: Set(Uuid::now_v7()),
            username: Set(username.to_string()),
            email: Set(None),
            provider: Set(Provider::Local),
            provider_user_id: Set(None),
            server_id: Set(None),
            user_type: Set(UserType::Admin),
            password_hash: Set(Some(password::hash_password(password).unwrap())),
            thumb: Set(None),
            is_home_user: Set(false),
            last_login_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            federation_key: Set(None),
            local_username: Set(Some(username.to_string())),
        }
        .insert(resolver.db())
        .await
        .unwrap();
    }

    async fn user_count(resolver: &IdentityResolver) -> u64 {
        user::Entity::find().count(resolver.db()).await.unwrap()
    }

    // --- servers ---

    #[tokio::test]
    async fn test_find_server_by_uri_exact_match() {
        let resolver = setup().await;
        let plex = insert_server(&resolver, "http://plex.lan:32400", ServerType::Plex, true).await;

        let found = resolver
            .find_server_by_uri("http://plex.lan:32400", ServerType::Plex)
            .await
            .unwrap();
        assert_eq!(found.map(|s| s.id), Some(plex.id));
    }

    #[tokio::test]
    async fn test_find_server_by_uri_is_not_normalized() {
        let resolver = setup().await;
        insert_server(&resolver, "http://plex.lan:32400", ServerType::Plex, true).await;

        for variant in [
            "http://plex.lan:32400/",
            "HTTP://PLEX.LAN:32400",
            "https://plex.lan:32400",
        ] {
            let found = resolver
                .find_server_by_uri(variant, ServerType::Plex)
                .await
                .unwrap();
            assert!(found.is_none(), "{variant} must not match");
        }
    }

    #[tokio::test]
    async fn test_find_server_by_uri_filters_by_type() {
        let resolver = setup().await;
        insert_server(&resolver, "http://media.lan:8096", ServerType::Emby, true).await;

        let as_jellyfin = resolver
            .find_server_by_uri("http://media.lan:8096", ServerType::Jellyfin)
            .await
            .unwrap();
        assert!(as_jellyfin.is_none());

        let as_emby = resolver
            .find_server_by_uri("http://media.lan:8096", ServerType::Emby)
            .await
            .unwrap();
        assert!(as_emby.is_some());
    }

    #[tokio::test]
    async fn test_list_servers_by_type() {
        let resolver = setup().await;
        insert_server(&resolver, "http://a", ServerType::Plex, true).await;
        insert_server(&resolver, "http://b", ServerType::Plex, false).await;
        insert_server(&resolver, "http://c", ServerType::Jellyfin, true).await;

        let plex = resolver.list_servers_by_type(ServerType::Plex).await.unwrap();
        assert_eq!(plex.len(), 2);
        assert!(plex.iter().all(|s| s.server_type == ServerType::Plex));

        let emby = resolver.list_servers_by_type(ServerType::Emby).await.unwrap();
        assert!(emby.is_empty());
    }

    #[tokio::test]
    async fn test_list_enabled_media_servers_skips_local_and_disabled() {
        let resolver = setup().await;
        let plex = insert_server(&resolver, "http://plex", ServerType::Plex, true).await;
        let jelly = insert_server(&resolver, "http://jelly", ServerType::Jellyfin, true).await;
        insert_server(&resolver, "http://emby", ServerType::Emby, false).await;
        insert_server(&resolver, "local://", ServerType::Local, true).await;

        let ids: Vec<Uuid> = resolver
            .list_enabled_media_servers()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&plex.id));
        assert!(ids.contains(&jelly.id));
    }

    // --- resolve_plex_user ---

    #[tokio::test]
    async fn test_resolve_plex_user_creates_on_empty_store() {
        let resolver = setup().await;
        let server = insert_server(&resolver, "http://plex", ServerType::Plex, true).await;

        let user = resolver
            .resolve_plex_user("123", server.id, "testuser", Some("test@example.com"), None, None)
            .await
            .unwrap();

        assert_eq!(user.provider, Provider::Plex);
        assert_eq!(user.provider_user_id.as_deref(), Some("123"));
        assert_eq!(user.server_id, Some(server.id));
        assert_eq!(user.username, "testuser");
        assert_eq!(user.email.as_deref(), Some("test@example.com"));
        assert_eq!(user.user_type, UserType::MediaUser);
        assert!(user.password_hash.is_none());
        assert!(user.last_login_at.is_none());
        assert_eq!(user_count(&resolver).await, 1);
    }

    #[tokio::test]
    async fn test_resolve_plex_user_second_call_updates_same_row() {
        let resolver = setup().await;
        let server = insert_server(&resolver, "http://plex", ServerType::Plex, true).await;

        let first = resolver
            .resolve_plex_user("123", server.id, "testuser", Some("test@example.com"), None, None)
            .await
            .unwrap();
        let second = resolver
            .resolve_plex_user(
                "123",
                server.id,
                "testuser2",
                Some("new@example.com"),
                Some("https://plex.tv/avatar.png"),
                Some(true),
            )
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.username, "testuser2");
        assert_eq!(second.email.as_deref(), Some("new@example.com"));
        assert_eq!(second.thumb.as_deref(), Some("https://plex.tv/avatar.png"));
        assert!(second.is_home_user);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(user_count(&resolver).await, 1);
    }

    #[tokio::test]
    async fn test_resolve_plex_user_absent_optionals_overwrite() {
        let resolver = setup().await;
        let server = insert_server(&resolver, "http://plex", ServerType::Plex, true).await;

        resolver
            .resolve_plex_user("7", server.id, "u", None, Some("https://a/b.png"), Some(true))
            .await
            .unwrap();
        let refreshed = resolver
            .resolve_plex_user("7", server.id, "u", None, None, None)
            .await
            .unwrap();

        assert!(refreshed.thumb.is_none());
        assert!(!refreshed.is_home_user);
    }

    #[tokio::test]
    async fn test_resolve_plex_user_distinct_servers_distinct_rows() {
        let resolver = setup().await;
        let a = insert_server(&resolver, "http://plex-a", ServerType::Plex, true).await;
        let b = insert_server(&resolver, "http://plex-b", ServerType::Plex, true).await;

        let on_a = resolver
            .resolve_plex_user("123", a.id, "same", None, None, None)
            .await
            .unwrap();
        let on_b = resolver
            .resolve_plex_user("123", b.id, "same", None, None, None)
            .await
            .unwrap();

        assert_ne!(on_a.id, on_b.id);
        assert_eq!(user_count(&resolver).await, 2);
    }

    #[tokio::test]
    async fn test_resolve_plex_user_adopts_row_written_concurrently() {
        // Simulates losing the race: another writer committed the identity
        // between our decision to log in and our write.
        let resolver = setup().await;
        let server = insert_server(&resolver, "http://plex", ServerType::Plex, true).await;
        let now = Utc::now().naive_utc();
        let existing_id = Uuid::now_v7();
        user::ActiveModel {
            id: Set(existing_id),
            username: Set("racer".to_string()),
            email: Set(None),
            provider: Set(Provider::Plex),
            provider_user_id: Set(Some("555".to_string())),
            server_id: Set(Some(server.id)),
            user_type: Set(UserType::MediaUser),
            password_hash: Set(None),
            thumb: Set(None),
            is_home_user: Set(false),
            last_login_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            federation_key: Set(Some(federation_key(Provider::Plex, server.id, "555"))),
            local_username: Set(None),
        }
        .insert(resolver.db())
        .await
        .unwrap();

        let resolved = resolver
            .resolve_plex_user("555", server.id, "winner", None, None, None)
            .await
            .unwrap();

        assert_eq!(resolved.id, existing_id);
        assert_eq!(resolved.username, "winner");
        assert_eq!(user_count(&resolver).await, 1);
    }

    // --- resolve_media_user ---

    #[tokio::test]
    async fn test_resolve_media_user_reconciles_per_provider() {
        let resolver = setup().await;
        let server = insert_server(&resolver, "http://jelly", ServerType::Jellyfin, true).await;

        let first = resolver
            .resolve_media_user("abc", server.id, "bob", Some("bob@a"), Provider::Jellyfin)
            .await
            .unwrap();
        let second = resolver
            .resolve_media_user("abc", server.id, "robert", Some("bob@b"), Provider::Jellyfin)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.provider, Provider::Jellyfin);
        assert_eq!(second.username, "robert");
        assert_eq!(second.email.as_deref(), Some("bob@b"));
        assert_eq!(user_count(&resolver).await, 1);
    }

    #[tokio::test]
    async fn test_resolve_media_user_keeps_providers_apart() {
        let resolver = setup().await;
        let server = insert_server(&resolver, "http://media", ServerType::Emby, true).await;

        let emby = resolver
            .resolve_media_user("1", server.id, "x", None, Provider::Emby)
            .await
            .unwrap();
        let jelly = resolver
            .resolve_media_user("1", server.id, "x", None, Provider::Jellyfin)
            .await
            .unwrap();

        assert_ne!(emby.id, jelly.id);
    }

    #[tokio::test]
    async fn test_resolve_media_user_preserves_thumb() {
        let resolver = setup().await;
        let server = insert_server(&resolver, "http://plex", ServerType::Plex, true).await;

        resolver
            .resolve_plex_user("9", server.id, "p", None, Some("https://a/t.png"), Some(true))
            .await
            .unwrap();
        let refreshed = resolver
            .resolve_media_user("9", server.id, "p2", None, Provider::Plex)
            .await
            .unwrap();

        assert_eq!(refreshed.username, "p2");
        assert_eq!(refreshed.thumb.as_deref(), Some("https://a/t.png"));
        assert!(refreshed.is_home_user);
    }

    #[tokio::test]
    async fn test_resolve_media_user_rejects_local_provider() {
        let resolver = setup().await;
        let server = insert_server(&resolver, "http://emby", ServerType::Emby, true).await;

        for provider in [Provider::Local, Provider::Unlinked] {
            let err = resolver
                .resolve_media_user("1", server.id, "x", None, provider)
                .await
                .unwrap_err();
            assert!(matches!(err, ResolveError::UnsupportedProvider(p) if p == provider));
        }
        assert_eq!(user_count(&resolver).await, 0);
    }

    #[tokio::test]
    async fn test_resolve_unknown_server_is_store_error() {
        let resolver = setup().await;
        let err = resolver
            .resolve_plex_user("1", Uuid::now_v7(), "ghost", None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Store(_)), "got {err:?}");
    }

    // --- create_media_user_from_provider_payload ---

    #[tokio::test]
    async fn test_payload_create_always_inserts() {
        let resolver = setup().await;
        let server = insert_server(&resolver, "http://emby", ServerType::Emby, true).await;
        let payload = ProviderPayload {
            id: "e-1".to_string(),
            username: "eve".to_string(),
            email: Some("eve@example.com".to_string()),
            thumb: Some("https://emby/avatar".to_string()),
        };

        let first = resolver
            .create_media_user_from_provider_payload(&payload, &server, Provider::Emby)
            .await
            .unwrap();
        let second = resolver
            .create_media_user_from_provider_payload(&payload, &server, Provider::Emby)
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(user_count(&resolver).await, 2);
        assert_eq!(first.provider_user_id.as_deref(), Some("e-1"));
        assert_eq!(first.server_id, Some(server.id));
        assert_eq!(first.thumb.as_deref(), Some("https://emby/avatar"));
        assert!(first.federation_key.is_none());
    }

    fn payload(id: &str, username: &str) -> ProviderPayload {
        ProviderPayload {
            id: id.to_string(),
            username: username.to_string(),
            email: None,
            thumb: Some("https://jf/avatar".to_string()),
        }
    }

    #[tokio::test]
    async fn test_resolve_claims_imported_row() {
        let resolver = setup().await;
        let server = insert_server(&resolver, "http://jelly", ServerType::Jellyfin, true).await;
        let dana = payload("j-1", "dana");
        let imported = resolver
            .create_media_user_from_provider_payload(&dana, &server, Provider::Jellyfin)
            .await
            .unwrap();

        let resolved = resolver
            .resolve_media_user("j-1", server.id, "dana2", Some("d@x"), Provider::Jellyfin)
            .await
            .unwrap();

        assert_eq!(resolved.id, imported.id);
        assert_eq!(resolved.created_at, imported.created_at);
        assert_eq!(resolved.username, "dana2");
        assert_eq!(resolved.email.as_deref(), Some("d@x"));
        assert_eq!(resolved.thumb.as_deref(), Some("https://jf/avatar"));
        assert_eq!(
            resolved.federation_key,
            Some(federation_key(Provider::Jellyfin, server.id, "j-1"))
        );
        assert_eq!(user_count(&resolver).await, 1);
    }

    #[tokio::test]
    async fn test_resolve_claims_oldest_of_duplicate_imports() {
        let resolver = setup().await;
        let server = insert_server(&resolver, "http://plex", ServerType::Plex, true).await;
        let oldest = resolver
            .create_media_user_from_provider_payload(&payload("42", "p"), &server, Provider::Plex)
            .await
            .unwrap();
        let newer = resolver
            .create_media_user_from_provider_payload(&payload("42", "p"), &server, Provider::Plex)
            .await
            .unwrap();

        let first = resolver
            .resolve_plex_user("42", server.id, "p", None, None, None)
            .await
            .unwrap();
        let second = resolver
            .resolve_plex_user("42", server.id, "p", None, None, None)
            .await
            .unwrap();

        assert_eq!(first.id, oldest.id);
        assert_eq!(second.id, oldest.id);
        let untouched = resolver.find_user_by_id(newer.id).await.unwrap().unwrap();
        assert!(untouched.federation_key.is_none());
        assert_eq!(user_count(&resolver).await, 2);
    }

    #[tokio::test]
    async fn test_resolve_leaves_import_alone_when_key_already_held() {
        let resolver = setup().await;
        let server = insert_server(&resolver, "http://plex", ServerType::Plex, true).await;
        let keyed = resolver
            .resolve_plex_user("8", server.id, "k", None, None, None)
            .await
            .unwrap();
        let imported = resolver
            .create_media_user_from_provider_payload(&payload("8", "k"), &server, Provider::Plex)
            .await
            .unwrap();

        let resolved = resolver
            .resolve_plex_user("8", server.id, "k2", None, None, None)
            .await
            .unwrap();

        assert_eq!(resolved.id, keyed.id);
        let imported = resolver.find_user_by_id(imported.id).await.unwrap().unwrap();
        assert!(imported.federation_key.is_none());
        assert_eq!(imported.username, "k");
    }

    #[tokio::test]
    async fn test_resolve_does_not_claim_other_provider_import() {
        let resolver = setup().await;
        let server = insert_server(&resolver, "http://media", ServerType::Emby, true).await;
        let imported = resolver
            .create_media_user_from_provider_payload(&payload("1", "x"), &server, Provider::Emby)
            .await
            .unwrap();

        let resolved = resolver
            .resolve_media_user("1", server.id, "x", None, Provider::Jellyfin)
            .await
            .unwrap();

        assert_ne!(resolved.id, imported.id);
        assert_eq!(user_count(&resolver).await, 2);
    }

    #[tokio::test]
    async fn test_payload_create_rejects_local_provider() {
        let resolver = setup().await;
        let server = insert_server(&resolver, "local://", ServerType::Local, true).await;
        let payload = ProviderPayload {
            id: "1".to_string(),
            username: "x".to_string(),
            email: None,
            thumb: None,
        };

        let err = resolver
            .create_media_user_from_provider_payload(&payload, &server, Provider::Local)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnsupportedProvider(Provider::Local)));
    }

    // --- find_user_by_credentials ---

    #[tokio::test]
    async fn test_credentials_success_returns_user() {
        let resolver = setup().await;
        insert_local_user(&resolver, "admin", "correct").await;

        let user = resolver
            .find_user_by_credentials("admin", "correct")
            .await
            .unwrap()
            .expect("valid credentials should resolve");
        assert_eq!(user.username, "admin");
        assert_eq!(user.provider, Provider::Local);
    }

    #[tokio::test]
    async fn test_credentials_unknown_user_and_wrong_password_look_alike() {
        let resolver = setup().await;
        insert_local_user(&resolver, "admin", "correct").await;

        let unknown = resolver.find_user_by_credentials("nobody", "correct").await.unwrap();
        let wrong = resolver.find_user_by_credentials("admin", "wrong").await.unwrap();
        assert!(unknown.is_none());
        assert!(wrong.is_none());
    }

    #[tokio::test]
    async fn test_credentials_ignore_federated_users() {
        let resolver = setup().await;
        let server = insert_server(&resolver, "http://plex", ServerType::Plex, true).await;
        resolver
            .resolve_plex_user("1", server.id, "alice", None, None, None)
            .await
            .unwrap();

        let found = resolver.find_user_by_credentials("alice", "").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_credentials_use_custom_verifier() {
        fn accept_all(_: &str, _: &str) -> bool {
            true
        }
        let resolver = setup().await.with_verifier(accept_all);
        insert_local_user(&resolver, "admin", "correct").await;

        let found = resolver.find_user_by_credentials("admin", "anything").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_credentials_default_verifier_accepts_admin_created_user() {
        let resolver = setup().await;
        crate::admin::Admin::new(resolver.db().clone())
            .create_local_user("ops", "hunter2", UserType::Staff, None)
            .await
            .unwrap();

        let found = resolver.find_user_by_credentials("ops", "hunter2").await.unwrap();
        assert_eq!(found.map(|u| u.user_type), Some(UserType::Staff));
        assert!(resolver.find_user_by_credentials("ops", "hunter3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_credentials_do_not_touch_last_login() {
        let resolver = setup().await;
        insert_local_user(&resolver, "admin", "pw").await;

        let user = resolver.find_user_by_credentials("admin", "pw").await.unwrap().unwrap();
        assert!(user.last_login_at.is_none());
    }

    // --- touch_last_login ---

    #[tokio::test]
    async fn test_touch_last_login_sets_and_advances() {
        let resolver = setup().await;
        let server = insert_server(&resolver, "http://plex", ServerType::Plex, true).await;
        let user = resolver
            .resolve_plex_user("1", server.id, "u", None, None, None)
            .await
            .unwrap();
        assert!(user.last_login_at.is_none());

        resolver.touch_last_login(&user).await.unwrap();
        let once = resolver.find_user_by_id(user.id).await.unwrap().unwrap();
        let first_stamp = once.last_login_at.expect("last_login_at should be set");

        resolver.touch_last_login(&once).await.unwrap();
        let twice = resolver.find_user_by_id(user.id).await.unwrap().unwrap();
        let second_stamp = twice.last_login_at.expect("last_login_at should be set");

        assert!(second_stamp > first_stamp);
    }

    #[tokio::test]
    async fn test_touch_last_login_beats_stored_stamp_from_stale_record() {
        let resolver = setup().await;
        let server = insert_server(&resolver, "http://plex", ServerType::Plex, true).await;
        let stale = resolver
            .resolve_plex_user("1", server.id, "u", None, None, None)
            .await
            .unwrap();

        // Another session stamped the row with a clock that ran ahead; the
        // caller still holds the record from before that write.
        let ahead = Utc::now().naive_utc() + Duration::hours(1);
        let mut active: user::ActiveModel = stale.clone().into();
        active.last_login_at = Set(Some(ahead));
        active.update(resolver.db()).await.unwrap();

        resolver.touch_last_login(&stale).await.unwrap();
        let after = resolver.find_user_by_id(stale.id).await.unwrap().unwrap();
        assert!(after.last_login_at.unwrap() > ahead);
        assert!(after.updated_at > stale.updated_at);
    }

    #[tokio::test]
    async fn test_touch_last_login_missing_user_is_store_error() {
        let resolver = setup().await;
        let server = insert_server(&resolver, "http://plex", ServerType::Plex, true).await;
        let user = resolver
            .resolve_plex_user("1", server.id, "u", None, None, None)
            .await
            .unwrap();
        user::Entity::delete_by_id(user.id).exec(resolver.db()).await.unwrap();

        let err = resolver.touch_last_login(&user).await.unwrap_err();
        assert!(matches!(err, ResolveError::Store(DbErr::RecordNotFound(_))), "got {err:?}");
    }

    #[tokio::test]
    async fn test_touch_last_login_leaves_profile_alone() {
        let resolver = setup().await;
        let server = insert_server(&resolver, "http://plex", ServerType::Plex, true).await;
        let user = resolver
            .resolve_plex_user("1", server.id, "u", Some("u@x"), None, Some(true))
            .await
            .unwrap();

        resolver.touch_last_login(&user).await.unwrap();
        let after = resolver.find_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(after.username, "u");
        assert_eq!(after.email.as_deref(), Some("u@x"));
        assert!(after.is_home_user);
    }

    // --- reads ---

    #[tokio::test]
    async fn test_list_users_for_server() {
        let resolver = setup().await;
        let a = insert_server(&resolver, "http://a", ServerType::Plex, true).await;
        let b = insert_server(&resolver, "http://b", ServerType::Plex, true).await;
        resolver.resolve_plex_user("1", a.id, "x", None, None, None).await.unwrap();
        resolver.resolve_plex_user("2", a.id, "y", None, None, None).await.unwrap();
        resolver.resolve_plex_user("1", b.id, "x", None, None, None).await.unwrap();

        assert_eq!(resolver.list_users_for_server(a.id).await.unwrap().len(), 2);
        assert_eq!(resolver.list_users_for_server(b.id).await.unwrap().len(), 1);
    }

    #[test]
    fn test_federation_key_format() {
        let server = Uuid::nil();
        assert_eq!(
            federation_key(Provider::Jellyfin, server, "abc"),
            "jellyfin:00000000-0000-0000-0000-000000000000:abc"
        );
    }
}
