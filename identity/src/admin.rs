use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, SqlErr,
};
use uuid::Uuid;

use crate::entity::media_server::{self, ServerType};
use crate::entity::user::{self, Provider, UserType};
use crate::entity::user_permission;
use crate::error::{ResolveError, ResolveResult};
use crate::password;

/// Administrative writes: server registration, local account provisioning,
/// permission records and user deletion.
#[derive(Clone)]
pub struct Admin {
    db: DatabaseConnection,
}

fn conflict_or_store(e: DbErr, msg: &str) -> ResolveError {
    match e.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => ResolveError::Conflict(msg.to_owned()),
        _ => ResolveError::Store(e),
    }
}

impl Admin {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn register_server(
        &self,
        name: &str,
        base_uri: &str,
        server_type: ServerType,
    ) -> ResolveResult<media_server::Model> {
        let now = Utc::now().naive_utc();
        let server = media_server::ActiveModel {
            id: Set(Uuid::now_v7()),
            name: Set(name.to_owned()),
            base_uri: Set(base_uri.to_owned()),
            server_type: Set(server_type),
            is_enabled: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await
        .map_err(|e| conflict_or_store(e, "A server with this URI and type already exists"))?;

        tracing::info!(
            server_id = %server.id,
            base_uri = %server.base_uri,
            server_type = server_type.as_str(),
            "Registered server"
        );
        Ok(server)
    }

    /// Returns `None` when no server has this id.
    pub async fn set_server_enabled(
        &self,
        id: Uuid,
        enabled: bool,
    ) -> ResolveResult<Option<media_server::Model>> {
        let Some(server) = media_server::Entity::find_by_id(id).one(&self.db).await? else {
            return Ok(None);
        };

        let mut active: media_server::ActiveModel = server.into();
        active.is_enabled = Set(enabled);
        active.updated_at = Set(Utc::now().naive_utc());
        let updated = active.update(&self.db).await?;

        tracing::info!(server_id = %id, enabled, "Updated server state");
        Ok(Some(updated))
    }

    /// Provision a local account with an Argon2-hashed password.
    /// Usernames are unique among local accounts; the unique index on
    /// `local_username` rejects a second one even under concurrent calls.
    pub async fn create_local_user(
        &self,
        username: &str,
        password: &str,
        user_type: UserType,
        email: Option<&str>,
    ) -> ResolveResult<user::Model> {
        if user_type == UserType::LocalUser {
            tracing::warn!(
                username = %username,
                "Provisioning with deprecated user type local_user"
            );
        }
        let password_hash = password::hash_password(password)?;

        let now = Utc::now().naive_utc();
        let created = user::ActiveModel {
            id: Set(Uuid::now_v7()),
            username: Set(username.to_owned()),
            email: Set(email.map(str::to_owned)),
            provider: Set(Provider::Local),
            provider_user_id: Set(None),
            server_id: Set(None),
            user_type: Set(user_type),
            password_hash: Set(Some(password_hash)),
            thumb: Set(None),
            is_home_user: Set(false),
            last_login_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            federation_key: Set(None),
            local_username: Set(Some(username.to_owned())),
        }
        .insert(&self.db)
        .await
        .map_err(|e| conflict_or_store(e, &format!("Local user '{username}' already exists")))?;

        tracing::info!(
            user_id = %created.id,
            username = %username,
            user_type = user_type.as_str(),
            "Created local user"
        );
        Ok(created)
    }

    pub async fn grant_permission(
        &self,
        user_id: Uuid,
        permission: &str,
    ) -> ResolveResult<user_permission::Model> {
        let granted = user_permission::ActiveModel {
            id: Set(Uuid::now_v7()),
            user_id: Set(user_id),
            permission: Set(permission.to_owned()),
            created_at: Set(Utc::now().naive_utc()),
        }
        .insert(&self.db)
        .await
        .map_err(|e| conflict_or_store(e, "Permission already granted"))?;
        Ok(granted)
    }

    pub async fn list_permissions(&self, user_id: Uuid) -> ResolveResult<Vec<String>> {
        let rows = user_permission::Entity::find()
            .filter(user_permission::Column::UserId.eq(user_id))
            .order_by_asc(user_permission::Column::Permission)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(|p| p.permission).collect())
    }

    /// Delete a user; permission records go with it. Returns whether a row was removed.
    pub async fn delete_user(&self, id: Uuid) -> ResolveResult<bool> {
        let result = user::Entity::delete_by_id(id).exec(&self.db).await?;
        let deleted = result.rows_affected > 0;
        if deleted {
            tracing::info!(user_id = %id, "Deleted user");
        }
        Ok(deleted)
    }

    /// Return the total number of users in the store.
    pub async fn count_users(&self) -> ResolveResult<u64> {
        Ok(user::Entity::find().count(&self.db).await?)
    }
}
