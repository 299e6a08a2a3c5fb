use clap::{Parser, Subcommand};
use identity::admin::Admin;
use identity::config::Settings;
use identity::dto::{ServerResponse, UserResponse};
use identity::entity::media_server::ServerType;
use identity::entity::user::{Provider, UserType};
use identity::payload::ProviderPayload;
use identity::resolver::IdentityResolver;
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use serde::Serialize;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "identity", about = "Media-server identity store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations and exit
    Migrate,
    /// Manage media servers
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },
    /// Manage and resolve users
    User {
        #[command(subcommand)]
        action: UserAction,
    },
}

#[derive(Subcommand)]
enum ServerAction {
    /// Register a server
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        uri: String,
        /// plex | emby | jellyfin | local
        #[arg(long = "type")]
        server_type: ServerType,
    },
    /// List servers of one type, or every enabled media server
    List {
        #[arg(long = "type")]
        server_type: Option<ServerType>,
    },
    Enable {
        #[arg(long)]
        id: Uuid,
    },
    Disable {
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Provision a local account
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        /// admin | staff | support
        #[arg(long, default_value = "admin")]
        user_type: UserType,
        #[arg(long)]
        email: Option<String>,
    },
    /// Check local credentials and record the login
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Find or create a federated user on a registered server
    Resolve {
        #[arg(long)]
        server_uri: String,
        #[arg(long)]
        provider: Provider,
        #[arg(long)]
        provider_user_id: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        thumb: Option<String>,
        #[arg(long, action = clap::ArgAction::SetTrue)]
        home_user: bool,
    },
    /// Insert a user from a raw provider JSON payload
    Import {
        #[arg(long)]
        server_id: Uuid,
        #[arg(long)]
        provider: Provider,
        #[arg(long)]
        payload: String,
    },
    Delete {
        #[arg(long)]
        id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Init structured logging (respects RUST_LOG; defaults to info)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    tracing::info!(database = %settings.redacted_database_url(), "connecting to database");

    let db = Database::connect(&settings.database_url).await?;
    Migrator::up(&db, None).await?;

    tracing::info!("database initialized");

    let resolver = IdentityResolver::new(db.clone());
    let admin = Admin::new(db);

    match cli.command {
        Commands::Migrate => {}
        Commands::Server { action } => handle_server_action(&resolver, &admin, action).await?,
        Commands::User { action } => handle_user_action(&resolver, &admin, action).await?,
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn handle_server_action(
    resolver: &IdentityResolver,
    admin: &Admin,
    action: ServerAction,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ServerAction::Add {
            name,
            uri,
            server_type,
        } => {
            let server = admin.register_server(&name, &uri, server_type).await?;
            print_json(&ServerResponse::from(server))?;
        }
        ServerAction::List { server_type } => {
            let servers = match server_type {
                Some(t) => resolver.list_servers_by_type(t).await?,
                None => resolver.list_enabled_media_servers().await?,
            };
            let servers: Vec<ServerResponse> = servers.into_iter().map(Into::into).collect();
            print_json(&servers)?;
        }
        ServerAction::Enable { id } => set_enabled(admin, id, true).await?,
        ServerAction::Disable { id } => set_enabled(admin, id, false).await?,
    }
    Ok(())
}

async fn set_enabled(
    admin: &Admin,
    id: Uuid,
    enabled: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    match admin.set_server_enabled(id, enabled).await? {
        Some(server) => print_json(&ServerResponse::from(server)),
        None => Err(format!("no server with id {id}").into()),
    }
}

async fn handle_user_action(
    resolver: &IdentityResolver,
    admin: &Admin,
    action: UserAction,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        UserAction::Create {
            username,
            password,
            user_type,
            email,
        } => {
            let user = admin
                .create_local_user(&username, &password, user_type, email.as_deref())
                .await?;
            print_json(&UserResponse::from(user))?;
        }
        UserAction::Login { username, password } => {
            let Some(user) = resolver.find_user_by_credentials(&username, &password).await? else {
                return Err("invalid credentials".into());
            };
            resolver.touch_last_login(&user).await?;
            let refreshed = resolver.find_user_by_id(user.id).await?.unwrap_or(user);
            print_json(&UserResponse::from(refreshed))?;
        }
        UserAction::Resolve {
            server_uri,
            provider,
            provider_user_id,
            username,
            email,
            thumb,
            home_user,
        } => {
            let server_type = match provider {
                Provider::Plex => ServerType::Plex,
                Provider::Emby => ServerType::Emby,
                Provider::Jellyfin => ServerType::Jellyfin,
                other => {
                    return Err(format!("provider '{}' is not federated", other.as_str()).into());
                }
            };
            let Some(server) = resolver.find_server_by_uri(&server_uri, server_type).await? else {
                let kind = server_type.as_str();
                return Err(format!("no {kind} server registered at {server_uri}").into());
            };
            let user = if provider == Provider::Plex {
                resolver
                    .resolve_plex_user(
                        &provider_user_id,
                        server.id,
                        &username,
                        email.as_deref(),
                        thumb.as_deref(),
                        Some(home_user),
                    )
                    .await?
            } else {
                resolver
                    .resolve_media_user(
                        &provider_user_id,
                        server.id,
                        &username,
                        email.as_deref(),
                        provider,
                    )
                    .await?
            };
            resolver.touch_last_login(&user).await?;
            let refreshed = resolver.find_user_by_id(user.id).await?.unwrap_or(user);
            print_json(&UserResponse::from(refreshed))?;
        }
        UserAction::Import {
            server_id,
            provider,
            payload,
        } => {
            let payload = ProviderPayload::from_json(serde_json::from_str(&payload)?)?;
            let Some(server) = resolver
                .list_enabled_media_servers()
                .await?
                .into_iter()
                .find(|s| s.id == server_id)
            else {
                return Err(format!("no enabled media server with id {server_id}").into());
            };
            let user = resolver
                .create_media_user_from_provider_payload(&payload, &server, provider)
                .await?;
            print_json(&UserResponse::from(user))?;
        }
        UserAction::Delete { id } => {
            if !admin.delete_user(id).await? {
                return Err(format!("no user with id {id}").into());
            }
            tracing::info!(user_id = %id, "User removed");
        }
    }
    Ok(())
}
