use std::str::FromStr;

use sea_orm::entity::prelude::*;
use serde::Serialize;
use uuid::Uuid;

/// Where a user's identity originates.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[sea_orm(string_value = "plex")]
    Plex,
    #[sea_orm(string_value = "emby")]
    Emby,
    #[sea_orm(string_value = "jellyfin")]
    Jellyfin,
    #[sea_orm(string_value = "local")]
    Local,
    /// No provider linkage recorded.
    #[sea_orm(string_value = "none")]
    #[serde(rename = "none")]
    Unlinked,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Plex => "plex",
            Provider::Emby => "emby",
            Provider::Jellyfin => "jellyfin",
            Provider::Local => "local",
            Provider::Unlinked => "none",
        }
    }

    /// True for providers whose users belong to a media server.
    pub fn is_federated(&self) -> bool {
        matches!(self, Provider::Plex | Provider::Emby | Provider::Jellyfin)
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plex" => Ok(Provider::Plex),
            "emby" => Ok(Provider::Emby),
            "jellyfin" => Ok(Provider::Jellyfin),
            "local" => Ok(Provider::Local),
            "none" => Ok(Provider::Unlinked),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    #[sea_orm(string_value = "admin")]
    Admin,
    #[sea_orm(string_value = "staff")]
    Staff,
    #[sea_orm(string_value = "support")]
    Support,
    #[sea_orm(string_value = "media_user")]
    MediaUser,
    /// Kept readable for old rows; new local accounts use `Admin`, `Staff` or `Support`.
    #[sea_orm(string_value = "local_user")]
    LocalUser,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Admin => "admin",
            UserType::Staff => "staff",
            UserType::Support => "support",
            UserType::MediaUser => "media_user",
            UserType::LocalUser => "local_user",
        }
    }
}

impl FromStr for UserType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserType::Admin),
            "staff" => Ok(UserType::Staff),
            "support" => Ok(UserType::Support),
            "media_user" => Ok(UserType::MediaUser),
            "local_user" => Ok(UserType::LocalUser),
            other => Err(format!("unknown user type '{other}'")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub provider: Provider,
    /// External identity key; `None` for local accounts.
    pub provider_user_id: Option<String>,
    pub server_id: Option<Uuid>,
    pub user_type: UserType,
    /// Argon2 PHC string; local accounts only.
    pub password_hash: Option<String>,
    pub thumb: Option<String>,
    pub is_home_user: bool,
    pub last_login_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
    /// `"{provider}:{server_id}:{provider_user_id}"`, unique when present.
    #[sea_orm(unique)]
    pub federation_key: Option<String>,
    /// Copy of `username` for local accounts, unique when present.
    #[sea_orm(unique)]
    pub local_username: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::media_server::Entity",
        from = "Column::ServerId",
        to = "super::media_server::Column::Id",
        on_delete = "Cascade"
    )]
    MediaServer,
    #[sea_orm(has_many = "super::user_permission::Entity")]
    UserPermission,
}

impl Related<super::media_server::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MediaServer.def()
    }
}

impl Related<super::user_permission::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserPermission.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
