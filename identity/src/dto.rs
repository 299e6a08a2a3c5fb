use chrono::NaiveDateTime;
use serde::Serialize;
use uuid::Uuid;

use crate::entity::media_server::{self, ServerType};
use crate::entity::user::{self, Provider, UserType};

// ---------- responses ----------

/// Public view of a user. The password hash never leaves the store.
#[derive(Debug, Serialize, Clone)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub provider: Provider,
    pub provider_user_id: Option<String>,
    pub server_id: Option<Uuid>,
    pub user_type: UserType,
    pub thumb: Option<String>,
    pub is_home_user: bool,
    pub last_login_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<user::Model> for UserResponse {
    fn from(m: user::Model) -> Self {
        Self {
            id: m.id,
            username: m.username,
            email: m.email,
            provider: m.provider,
            provider_user_id: m.provider_user_id,
            server_id: m.server_id,
            user_type: m.user_type,
            thumb: m.thumb,
            is_home_user: m.is_home_user,
            last_login_at: m.last_login_at,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct ServerResponse {
    pub id: Uuid,
    pub name: String,
    pub base_uri: String,
    pub server_type: ServerType,
    pub is_enabled: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<media_server::Model> for ServerResponse {
    fn from(m: media_server::Model) -> Self {
        Self {
            id: m.id,
            name: m.name,
            base_uri: m.base_uri,
            server_type: m.server_type,
            is_enabled: m.is_enabled,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}
