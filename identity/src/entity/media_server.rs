use std::str::FromStr;

use sea_orm::entity::prelude::*;
use serde::Serialize;
use uuid::Uuid;

/// Backend family a server speaks. `Local` marks the built-in credential
/// store and is never treated as a media server.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    #[sea_orm(string_value = "plex")]
    Plex,
    #[sea_orm(string_value = "emby")]
    Emby,
    #[sea_orm(string_value = "jellyfin")]
    Jellyfin,
    #[sea_orm(string_value = "local")]
    Local,
}

impl ServerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerType::Plex => "plex",
            ServerType::Emby => "emby",
            ServerType::Jellyfin => "jellyfin",
            ServerType::Local => "local",
        }
    }
}

impl FromStr for ServerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plex" => Ok(ServerType::Plex),
            "emby" => Ok(ServerType::Emby),
            "jellyfin" => Ok(ServerType::Jellyfin),
            "local" => Ok(ServerType::Local),
            other => Err(format!("unknown server type '{other}'")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "media_server")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    /// Compared byte-for-byte on lookup.
    pub base_uri: String,
    pub server_type: ServerType,
    pub is_enabled: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user::Entity")]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
