use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use presence_core::{AttendanceEntry, AttendanceFilter, AttendanceStatus, Role, UserFilter, UserId};
use std::path::Path;
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.presence.Presence1",
    default_service = "org.presence.Presence1",
    default_path = "/org/presence/Presence1"
)]
trait Presence {
    async fn check_in(&self, user_id: i64, image: Vec<u8>) -> zbus::Result<String>;
    async fn history(&self, filter_json: &str) -> zbus::Result<String>;
    async fn initialize_day(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn add_user(
        &self,
        username: &str,
        password_hash: &str,
        role: &str,
        face_image: &str,
    ) -> zbus::Result<String>;
    async fn remove_user(&self, user_id: i64) -> zbus::Result<bool>;
    async fn list_users(&self, filter_json: &str) -> zbus::Result<String>;
    async fn set_face_image(&self, user_id: i64, face_image: &str) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "presence", about = "Presence attendance CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check in with a face image
    CheckIn {
        /// User ID to check in
        #[arg(short, long)]
        user: UserId,
        /// Path to a JPEG or PNG photo of the user's face
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Show attendance history
    History(HistoryArgs),
    /// Create today's pending records now
    InitDay,
    /// Show daemon status
    Status,
    /// Manage enrolled users
    #[command(subcommand)]
    User(UserCommands),
}

#[derive(Subcommand)]
enum UserCommands {
    /// Enroll a user with a reference face image
    Add {
        #[arg(short, long)]
        username: String,
        /// user or admin
        #[arg(short, long, default_value = "user")]
        role: Role,
        /// Credential hash produced by the front end
        #[arg(long, default_value = "")]
        password_hash: String,
        /// Reference photo; must stay readable by presenced
        #[arg(short, long)]
        face_image: PathBuf,
    },
    /// Delete a user and all of its attendance
    Remove {
        /// User ID to remove
        id: UserId,
    },
    /// List users
    List {
        #[arg(short, long)]
        role: Option<Role>,
        /// Case-insensitive part of the username
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Replace a user's reference face image
    SetFace {
        /// User ID to update
        id: UserId,
        face_image: PathBuf,
    },
}

#[derive(Args)]
struct HistoryArgs {
    /// Only this user
    #[arg(short, long)]
    user: Option<UserId>,
    /// Exact date (YYYY-MM-DD)
    #[arg(long, conflicts_with_all = ["year", "month", "day"])]
    date: Option<NaiveDate>,
    #[arg(long)]
    year: Option<i32>,
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
    month: Option<u32>,
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=31))]
    day: Option<u32>,
    /// pending, early, on_time or late
    #[arg(long)]
    status: Option<AttendanceStatus>,
}

impl HistoryArgs {
    fn filter(&self) -> AttendanceFilter {
        AttendanceFilter {
            user_id: self.user,
            date: self.date,
            year: self.year,
            month: self.month,
            day: self.day,
            status: self.status,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let builder = if cli.session {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let conn = builder
        .build()
        .await
        .context("failed to connect to D-Bus")?;
    let proxy = PresenceProxy::new(&conn)
        .await
        .context("presenced is not reachable")?;

    match cli.command {
        Commands::CheckIn { user, image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            if image::guess_format(&bytes).is_err() {
                bail!("{} is not a recognized image format", image.display());
            }
            tracing::debug!(user, bytes = bytes.len(), "submitting check-in");

            let reply = proxy.check_in(user, bytes).await?;
            let record: serde_json::Value = serde_json::from_str(&reply)?;
            println!(
                "Checked in on {} at {}: {}",
                record["date"].as_str().unwrap_or("?"),
                record["time"].as_str().unwrap_or("?"),
                record["status"].as_str().unwrap_or("?"),
            );
        }
        Commands::History(args) => {
            let filter = serde_json::to_string(&args.filter())?;
            let reply = proxy.history(&filter).await?;
            let entries: Vec<AttendanceEntry> = serde_json::from_str(&reply)?;
            if entries.is_empty() {
                println!("No attendance records");
            }
            for entry in &entries {
                println!("{}", format_entry(entry));
            }
        }
        Commands::InitDay => {
            let reply = proxy.initialize_day().await?;
            let outcome: serde_json::Value = serde_json::from_str(&reply)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Status => {
            let reply = proxy.status().await?;
            let status: serde_json::Value = serde_json::from_str(&reply)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::User(command) => run_user_command(&proxy, command).await?,
    }

    Ok(())
}

async fn run_user_command(proxy: &PresenceProxy<'_>, command: UserCommands) -> Result<()> {
    match command {
        UserCommands::Add {
            username,
            role,
            password_hash,
            face_image,
        } => {
            let face_image = absolute_image(&face_image)?;
            let reply = proxy
                .add_user(&username, &password_hash, role.as_str(), &face_image)
                .await?;
            let user: serde_json::Value = serde_json::from_str(&reply)?;
            println!("Enrolled {username} as user {}", user["id"]);
        }
        UserCommands::Remove { id } => {
            if proxy.remove_user(id).await? {
                println!("Removed user {id} and its attendance");
            } else {
                println!("No user {id}");
            }
        }
        UserCommands::List { role, name } => {
            let filter = UserFilter {
                role,
                username_contains: name,
            };
            let reply = proxy.list_users(&serde_json::to_string(&filter)?).await?;
            let users: Vec<serde_json::Value> = serde_json::from_str(&reply)?;
            if users.is_empty() {
                println!("No users");
            }
            for user in &users {
                println!("{}", format_user(user));
            }
        }
        UserCommands::SetFace { id, face_image } => {
            let face_image = absolute_image(&face_image)?;
            proxy.set_face_image(id, &face_image).await?;
            println!("Updated reference face for user {id}");
        }
    }
    Ok(())
}

/// The daemon reads reference images in place, so send it an absolute path.
fn absolute_image(path: &Path) -> Result<String> {
    let absolute = std::fs::canonicalize(path)
        .with_context(|| format!("failed to resolve {}", path.display()))?;
    Ok(absolute.display().to_string())
}

fn format_user(user: &serde_json::Value) -> String {
    format!(
        "{:>5}  {:<16} {:<5}  {}",
        user["id"].as_i64().unwrap_or_default(),
        user["username"].as_str().unwrap_or("?"),
        user["role"].as_str().unwrap_or("?"),
        user["face_image"].as_str().unwrap_or("?"),
    )
}

fn format_entry(entry: &AttendanceEntry) -> String {
    let record = &entry.attendance;
    let time = record
        .time
        .map(|t| t.to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    format!(
        "{}  {:<16} {}  {}",
        record.date, entry.username, time, record.status
    )
}
