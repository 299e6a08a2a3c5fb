//! Identity - user identity resolution for media-server deployments
//!
//! Reconciles Plex, Emby and Jellyfin logins and local credentials into one
//! user/server model backed by a SeaORM store.

pub mod admin;
pub mod config;
pub mod dto;
pub mod entity;
pub mod error;
pub mod password;
pub mod payload;
pub mod resolver;

pub use admin::Admin;
pub use error::{ResolveError, ResolveResult};
pub use payload::ProviderPayload;
pub use resolver::IdentityResolver;
