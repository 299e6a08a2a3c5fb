pub use sea_orm_migration::prelude::*;

mod m20261001_000001_create_media_servers;
mod m20261001_000002_create_users;
mod m20261002_000003_create_user_permissions;
mod m20261005_000004_add_user_federation_key;
mod m20261012_000005_add_user_local_username;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_create_media_servers::Migration),
            Box::new(m20261001_000002_create_users::Migration),
            Box::new(m20261002_000003_create_user_permissions::Migration),
            Box::new(m20261005_000004_add_user_federation_key::Migration),
            Box::new(m20261012_000005_add_user_local_username::Migration),
        ]
    }
}
