pub mod media_server;
pub mod user;
pub mod user_permission;
