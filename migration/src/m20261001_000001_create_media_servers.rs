use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MediaServer::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MediaServer::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MediaServer::Name).string().not_null())
                    .col(ColumnDef::new(MediaServer::BaseUri).string().not_null())
                    .col(
                        ColumnDef::new(MediaServer::ServerType)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MediaServer::IsEnabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(MediaServer::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MediaServer::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Servers are looked up by (base_uri, server_type).
        manager
            .create_index(
                Index::create()
                    .name("idx_media_server_uri_type")
                    .table(MediaServer::Table)
                    .col(MediaServer::BaseUri)
                    .col(MediaServer::ServerType)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MediaServer::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum MediaServer {
    Table,
    Id,
    Name,
    BaseUri,
    ServerType,
    IsEnabled,
    CreatedAt,
    UpdatedAt,
}
