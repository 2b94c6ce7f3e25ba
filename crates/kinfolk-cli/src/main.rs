use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kinfolk_client::{reconcile, registered_local_ids, FaceClient, Person, DEFAULT_THRESHOLD};
use kinfolk_core::IdMapper;
use kinfolk_store::{attach_photo, AttachOutcome, FamilyStore, Member};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kinfolk", about = "Family archive face-recognition sync")]
struct Cli {
    /// Path to the local database (default: $XDG_DATA_HOME/kinfolk/kinfolk.db)
    #[arg(long, env = "KINFOLK_DB_PATH", global = true)]
    db: Option<PathBuf>,
    /// Override the stored server URL for this invocation
    #[arg(long, env = "KINFOLK_SERVER_URL", global = true)]
    server: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether the recognition server is reachable
    Status,
    /// Show the stored server URL, or store a new one
    Server {
        /// New server address (normalized before storing)
        url: Option<String>,
    },
    /// Manage family members
    #[command(subcommand)]
    Member(MemberCommands),
    /// Register a member's reference photo on the server
    Register {
        /// Local member id
        member_id: i64,
    },
    /// Recognize faces in a photo
    Recognize {
        image: PathBuf,
        /// Minimum confidence for a match
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,
        /// Attach the photo to every recognized member (duplicates skipped)
        #[arg(long)]
        attach: bool,
    },
    /// Attach a photo to a member's gallery, skipping perceptual duplicates
    Attach {
        /// Local member id
        member_id: i64,
        image: PathBuf,
    },
    /// List faces registered on the server
    Faces,
    /// Remove a member's face from the server
    Forget {
        /// Local member id
        member_id: i64,
    },
    /// Remove every registration from the server
    Clear,
    /// Register all members with reference photos the server is missing
    Sync,
}

#[derive(Subcommand)]
enum MemberCommands {
    /// Add a member, optionally with a reference photo
    Add {
        name: String,
        #[arg(long)]
        photo: Option<PathBuf>,
    },
    /// List members and their registration state
    List,
    /// Remove a member and their gallery
    Remove { id: i64 },
}

fn default_db_path() -> PathBuf {
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("kinfolk");
    data_dir.join("kinfolk.db")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db_path = cli.db.clone().unwrap_or_else(default_db_path);
    let store = FamilyStore::open(&db_path)
        .with_context(|| format!("opening database at {}", db_path.display()))?;
    tracing::debug!(db = %db_path.display(), "database opened");

    // Stored photos live next to the database.
    let photo_dir = db_path
        .parent()
        .map(|p| p.join("photos"))
        .unwrap_or_else(|| PathBuf::from("photos"));

    let server_url = match &cli.server {
        Some(url) => url.clone(),
        None => store.server_url()?,
    };

    match cli.command {
        Commands::Status => {
            let client = FaceClient::new(&server_url)?;
            if client.check_health().await {
                println!("server reachable: {}", client.base_url());
            } else {
                println!("server unreachable: {}", client.base_url());
                std::process::exit(1);
            }
        }

        Commands::Server { url } => match url {
            Some(url) => {
                let normalized = store.set_server_url(&url)?;
                println!("server url set to {normalized}");
            }
            None => println!("{}", store.server_url()?),
        },

        Commands::Member(cmd) => run_member(&store, cmd)?,

        Commands::Register { member_id } => {
            let member = require_member(&store, member_id)?;
            let Some(photo_path) = member.photo_path.as_deref() else {
                bail!("member {member_id} has no reference photo");
            };
            let photo = image::open(photo_path)
                .with_context(|| format!("decoding photo at {photo_path}"))?;

            let mapper = IdMapper::new(store.device_id()?);
            let client = FaceClient::new(&server_url)?;
            let message = client
                .register_face(mapper.to_server_id(member.id), &member.display_name, &photo)
                .await?;
            println!("{}: {message}", member.display_name);
        }

        Commands::Recognize {
            image,
            threshold,
            attach,
        } => {
            let photo = image::open(&image)
                .with_context(|| format!("decoding photo at {}", image.display()))?;
            let client = FaceClient::new(&server_url)?;
            let matches = client.recognize_face(&photo, threshold).await?;

            if matches.is_empty() {
                println!("no known faces found");
                return Ok(());
            }

            let mapper = IdMapper::new(store.device_id()?);
            for m in &matches {
                let local = local_member_for(&store, &mapper, &m.member_id)?;
                let confidence = (m.confidence * 100.0).round() as i64;
                match &local {
                    Some(member) => {
                        println!("{} ({confidence}%) — member #{}", m.member_name, member.id)
                    }
                    None => println!("{} ({confidence}%) — not in this archive", m.member_name),
                }

                if attach {
                    let Some(member) = local else { continue };
                    match attach_photo(&store, member.id, &photo, &photo_dir)? {
                        AttachOutcome::Attached { path, .. } => {
                            println!("  attached as {}", path.display())
                        }
                        AttachOutcome::Duplicate => println!("  already in the gallery, skipped"),
                    }
                }
            }
        }

        Commands::Attach { member_id, image } => {
            require_member(&store, member_id)?;
            let photo = image::open(&image)
                .with_context(|| format!("decoding photo at {}", image.display()))?;
            match attach_photo(&store, member_id, &photo, &photo_dir)? {
                AttachOutcome::Attached { path, .. } => println!("attached as {}", path.display()),
                AttachOutcome::Duplicate => println!("already in the gallery, nothing stored"),
            }
        }

        Commands::Faces => {
            let client = FaceClient::new(&server_url)?;
            let faces = client.list_faces().await?;
            if faces.is_empty() {
                println!("no faces registered");
            }
            let mapper = IdMapper::new(store.device_id()?);
            for face in &faces {
                let suffix = match local_member_for(&store, &mapper, &face.member_id)? {
                    Some(member) => format!(" (member #{})", member.id),
                    None => String::new(),
                };
                println!("{}  {}{}", face.member_id, face.member_name, suffix);
            }
        }

        Commands::Forget { member_id } => {
            let mapper = IdMapper::new(store.device_id()?);
            let client = FaceClient::new(&server_url)?;
            let message = client.delete_face(mapper.to_server_id(member_id)).await?;
            println!("{message}");
        }

        Commands::Clear => {
            let client = FaceClient::new(&server_url)?;
            let message = client.clear_all().await?;
            println!("{message}");
        }

        Commands::Sync => {
            let client = FaceClient::new(&server_url)?;
            if !client.check_health().await {
                bail!("server unreachable: {}", client.base_url());
            }

            let mapper = IdMapper::new(store.device_id()?);
            let people: Vec<Person> = store
                .members()?
                .into_iter()
                .map(|m| Person {
                    local_id: m.id,
                    display_name: m.display_name,
                    photo_path: m.photo_path.map(PathBuf::from),
                })
                .collect();

            let report = reconcile(&client, &mapper, &people).await?;
            println!(
                "registered {}, already known {}, no photo {}, failed {}",
                report.registered,
                report.already_registered,
                report.skipped_no_photo,
                report.failed
            );
            if let Some(faces) = &report.refreshed {
                let local = registered_local_ids(faces, &mapper);
                println!("{} of this archive's members now registered", local.len());
            }
        }
    }

    Ok(())
}

fn run_member(store: &FamilyStore, cmd: MemberCommands) -> Result<()> {
    match cmd {
        MemberCommands::Add { name, photo } => {
            let photo = photo
                .map(|p| {
                    p.canonicalize()
                        .with_context(|| format!("photo not found at {}", p.display()))
                })
                .transpose()?;
            let id = store.add_member(&name, photo.as_deref().and_then(|p| p.to_str()))?;
            println!("added member #{id}: {name}");
        }
        MemberCommands::List => {
            let members = store.members()?;
            if members.is_empty() {
                println!("no members yet");
            }
            for m in members {
                let photo = m.photo_path.as_deref().unwrap_or("no reference photo");
                println!("#{}  {}  [{}]", m.id, m.display_name, photo);
            }
        }
        MemberCommands::Remove { id } => {
            if store.remove_member(id)? {
                println!("removed member #{id}");
            } else {
                bail!("no member #{id}");
            }
        }
    }
    Ok(())
}

fn require_member(store: &FamilyStore, id: i64) -> Result<Member> {
    store
        .member(id)?
        .with_context(|| format!("no member #{id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::path::Path;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_parse() {
        let cli = Cli::try_parse_from([
            "kinfolk",
            "--db",
            "/tmp/kinfolk.db",
            "--server",
            "http://localhost:5000",
            "status",
        ])
        .unwrap();
        assert_eq!(cli.db.as_deref(), Some(Path::new("/tmp/kinfolk.db")));
        assert_eq!(cli.server.as_deref(), Some("http://localhost:5000"));
    }

    #[test]
    fn test_server_flag_reads_from_environment() {
        std::env::set_var("KINFOLK_SERVER_URL", "http://10.0.2.2:8080");
        let cli = Cli::try_parse_from(["kinfolk", "status"]).unwrap();
        std::env::remove_var("KINFOLK_SERVER_URL");
        assert_eq!(cli.server.as_deref(), Some("http://10.0.2.2:8080"));
    }
}

/// Resolve a wire-format server id to a member of this archive, if the
/// id is numeric, belongs to this device's namespace, and exists
/// locally.
fn local_member_for(
    store: &FamilyStore,
    mapper: &IdMapper,
    wire_id: &str,
) -> Result<Option<Member>> {
    let Some(server_id) = wire_id.trim().parse::<i64>().ok() else {
        return Ok(None);
    };
    if IdMapper::device_of(server_id) != mapper.device_id() {
        return Ok(None);
    }
    Ok(store.member(IdMapper::from_server_id(server_id))?)
}
