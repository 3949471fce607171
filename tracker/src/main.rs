use anyhow::{anyhow, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use serde::Serialize;
use shared::{CowEntry, ProtocolStep};
use std::path::PathBuf;
use std::process::ExitCode;

use cattle_tracker::backend::domain::breeding::{generate_report, parse_date, parse_period};
use cattle_tracker::backend::domain::models::entry::InseminationCommand;
use cattle_tracker::backend::domain::protocol_service::schedule;
use cattle_tracker::backend::domain::ImportMode;
use cattle_tracker::backend::store_api_base;
use cattle_tracker::logging::init_logging;
use cattle_tracker::{initialize_backend, AppConfig, AppContext};

#[derive(Parser)]
#[command(name = "cattle-tracker")]
#[command(about = "Dairy herd breeding records")]
struct Cli {
    /// Data directory (overrides config and CATTLE_TRACKER_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Server URL for this run only
    #[arg(long, global = true)]
    server: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage objects (herds)
    Objects {
        #[command(subcommand)]
        command: ObjectCommand,
    },
    /// List entries, optionally filtered
    List {
        #[arg(long, default_value = "")]
        query: String,
    },
    Show {
        cattle_id: String,
    },
    /// Add an animal
    Add {
        cattle_id: String,
        #[arg(long, default_value = "")]
        nickname: String,
        #[arg(long, default_value = "")]
        group: String,
        #[arg(long, default_value = "")]
        birth_date: String,
        #[arg(long, default_value = "")]
        calving_date: String,
        #[arg(long)]
        lactation: Option<u32>,
        #[arg(long)]
        vwp: Option<u32>,
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Change an animal's id, nickname, group, status or note
    Edit {
        cattle_id: String,
        #[arg(long)]
        new_id: Option<String>,
        #[arg(long)]
        nickname: Option<String>,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },
    Delete {
        cattle_id: String,
    },
    /// Record an insemination attempt
    Inseminate {
        cattle_id: String,
        #[arg(long)]
        date: String,
        #[arg(long, default_value = "")]
        bull: String,
        #[arg(long, default_value = "")]
        inseminator: String,
        #[arg(long, default_value = "")]
        code: String,
    },
    Calve {
        cattle_id: String,
        #[arg(long)]
        date: String,
    },
    DryOff {
        cattle_id: String,
        #[arg(long)]
        date: String,
    },
    Exit {
        cattle_id: String,
        #[arg(long)]
        date: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Breeding KPIs for a period
    Report {
        /// month, year or range
        #[arg(long, default_value = "month")]
        period: String,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        /// Default VWP in days (overrides config)
        #[arg(long)]
        vwp: Option<u32>,
    },
    /// Synchronization protocols
    Protocols {
        #[command(subcommand)]
        command: ProtocolCommand,
    },
    /// Snapshots and backup files
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },
    /// Server session
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
}

#[derive(Subcommand)]
enum ObjectCommand {
    List,
    Add { name: String },
    Rename { id: String, name: String },
    Delete { id: String },
    Switch { id: String },
}

#[derive(Subcommand)]
enum ProtocolCommand {
    List,
    /// Steps are given as DAY:DRUG, e.g. 0:GnRH 7:PGF 9:GnRH
    Add {
        name: String,
        #[arg(required = true)]
        steps: Vec<String>,
    },
    Remove {
        id: String,
    },
    Schedule {
        protocol: String,
        #[arg(long)]
        start: String,
    },
    /// Assign a protocol to an animal
    Assign {
        cattle_id: String,
        protocol: String,
        #[arg(long)]
        start: String,
    },
}

#[derive(Subcommand)]
enum BackupCommand {
    Create,
    List,
    Restore {
        key: String,
    },
    Export {
        path: PathBuf,
    },
    Import {
        path: PathBuf,
        /// Merge by cattle id instead of replacing the collection
        #[arg(long, default_value_t = false)]
        merge: bool,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    Login {
        username: String,
        #[arg(long)]
        password: String,
    },
    Register {
        username: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    Whoami,
    CheckUsername {
        username: String,
    },
    /// Remember a server URL for later runs; omit to go back to local storage
    SetServer {
        url: Option<String>,
    },
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_step(raw: &str) -> Result<ProtocolStep> {
    let (day, drug) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid step '{}', expected DAY:DRUG", raw))?;
    let day = day
        .trim()
        .parse::<u32>()
        .map_err(|_| anyhow!("Invalid day in step '{}'", raw))?;
    Ok(ProtocolStep {
        day,
        drug: drug.trim().to_string(),
    })
}

fn remote(context: &AppContext) -> Result<&cattle_tracker::backend::storage::RemoteBackend> {
    context
        .remote
        .as_deref()
        .ok_or_else(|| anyhow!("No server configured; use `session set-server <url>` first"))
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load(cli.data_dir.as_deref())?;
    if let Some(server) = cli.server {
        config.api_base = Some(server);
    }
    init_logging(&config.log_level);

    // Changing the server must not require reaching the old one
    if let Commands::Session {
        command: SessionCommand::SetServer { url },
    } = &cli.command
    {
        let kv = cattle_tracker::backend::storage::FileKeyValueStore::new(config.data_dir()?)?;
        return store_api_base(&kv, url.as_deref());
    }

    let context = initialize_backend(config).await?;
    let herd = &context.herd;

    match cli.command {
        Commands::Objects { command } => match command {
            ObjectCommand::List => {
                let current = herd.current_object_id();
                for object in herd.objects().await? {
                    let marker = if object.id == current { "*" } else { " " };
                    println!("{} {}\t{}", marker, object.id, object.name);
                }
            }
            ObjectCommand::Add { name } => print_json(&herd.add_object(&name).await?)?,
            ObjectCommand::Rename { id, name } => {
                if !herd.rename_object(&id, &name).await? {
                    return Err(anyhow!("Object {} not renamed", id));
                }
            }
            ObjectCommand::Delete { id } => herd.delete_object(&id).await?,
            ObjectCommand::Switch { id } => herd.switch_to_object(&id).await?,
        },
        Commands::List { query } => {
            for entry in herd.search(&query) {
                println!(
                    "{}\t{}\t{}\t{}",
                    entry.cattle_id, entry.nickname, entry.status, entry.insemination_date
                );
            }
        }
        Commands::Show { cattle_id } => {
            let entry = herd
                .find(&cattle_id)
                .ok_or_else(|| anyhow!("No animal with cattle ID '{}'", cattle_id))?;
            print_json(&entry)?;
        }
        Commands::Add {
            cattle_id,
            nickname,
            group,
            birth_date,
            calving_date,
            lactation,
            vwp,
            note,
        } => {
            let mut entry = CowEntry::new(cattle_id);
            entry.nickname = nickname;
            entry.group = group;
            entry.birth_date = birth_date;
            entry.calving_date = calving_date;
            entry.lactation = lactation;
            entry.vwp = vwp.unwrap_or(context.config.default_vwp);
            entry.note = note;
            print_json(&herd.add_entry(entry).await?)?;
        }
        Commands::Edit {
            cattle_id,
            new_id,
            nickname,
            group,
            status,
            note,
        } => {
            let mut entry = herd
                .find(&cattle_id)
                .ok_or_else(|| anyhow!("No animal with cattle ID '{}'", cattle_id))?;
            if let Some(new_id) = new_id {
                entry.cattle_id = new_id;
            }
            if let Some(nickname) = nickname {
                entry.nickname = nickname;
            }
            if let Some(group) = group {
                entry.group = group;
            }
            if let Some(status) = status {
                entry.status = status;
            }
            if let Some(note) = note {
                entry.note = note;
            }
            print_json(&herd.update_entry(&cattle_id, entry).await?)?;
        }
        Commands::Delete { cattle_id } => herd.delete_entry(&cattle_id).await?,
        Commands::Inseminate {
            cattle_id,
            date,
            bull,
            inseminator,
            code,
        } => {
            let command = InseminationCommand {
                date,
                bull,
                inseminator,
                code,
            };
            print_json(&herd.record_insemination(&cattle_id, command).await?)?;
        }
        Commands::Calve { cattle_id, date } => print_json(&herd.record_calving(&cattle_id, &date).await?)?,
        Commands::DryOff { cattle_id, date } => print_json(&herd.record_dry_off(&cattle_id, &date).await?)?,
        Commands::Exit {
            cattle_id,
            date,
            reason,
        } => print_json(&herd.record_exit(&cattle_id, &date, &reason).await?)?,
        Commands::Report {
            period,
            start,
            end,
            vwp,
        } => {
            let period = parse_period(&period, start.as_deref(), end.as_deref())?;
            let vwp = vwp.unwrap_or(context.config.default_vwp);
            let report = generate_report(&period, vwp, &herd.entries(), Local::now().date_naive());
            print_json(&report)?;
        }
        Commands::Protocols { command } => match command {
            ProtocolCommand::List => print_json(&context.protocols.list()?)?,
            ProtocolCommand::Add { name, steps } => {
                let steps = steps.iter().map(|s| parse_step(s)).collect::<Result<Vec<_>>>()?;
                print_json(&context.protocols.add(&name, steps)?)?;
            }
            ProtocolCommand::Remove { id } => context.protocols.remove(&id)?,
            ProtocolCommand::Schedule { protocol, start } => {
                let found = context
                    .protocols
                    .find(&protocol)?
                    .ok_or_else(|| anyhow!("Protocol not found: {}", protocol))?;
                let start = parse_date(&start).ok_or_else(|| anyhow!("Invalid date '{}'", start))?;
                print_json(&schedule(&found, start))?;
            }
            ProtocolCommand::Assign {
                cattle_id,
                protocol,
                start,
            } => {
                let found = context
                    .protocols
                    .find(&protocol)?
                    .ok_or_else(|| anyhow!("Protocol not found: {}", protocol))?;
                print_json(&herd.assign_protocol(&cattle_id, &found.name, &start).await?)?;
            }
        },
        Commands::Backup { command } => match command {
            BackupCommand::Create => println!("{}", context.backups.create_snapshot(&herd.entries())?),
            BackupCommand::List => print_json(&context.backups.list_snapshots()?)?,
            BackupCommand::Restore { key } => {
                let count = context.backups.restore_snapshot(herd, &key).await?;
                println!("Restored {} entries", count);
            }
            BackupCommand::Export { path } => {
                let file = context.backups.export_to_file(&herd.entries(), &path)?;
                println!("Exported {} entries to {}", file.count, path.display());
            }
            BackupCommand::Import { path, merge } => {
                let mode = if merge { ImportMode::Merge } else { ImportMode::Replace };
                let summary = context.backups.import_from_file(herd, &path, mode).await?;
                println!(
                    "Imported {} entries ({} skipped), {} total",
                    summary.imported, summary.discarded, summary.total
                );
            }
        },
        Commands::Session { command } => match command {
            SessionCommand::Login { username, password } => {
                let user = remote(&context)?.login(&username, &password).await?;
                print_json(&user)?;
            }
            SessionCommand::Register { username, password } => {
                let user = remote(&context)?.register(&username, &password).await?;
                print_json(&user)?;
            }
            SessionCommand::Logout => remote(&context)?.logout().await?,
            SessionCommand::Whoami => match remote(&context)?.get_current_user().await {
                Some(user) => print_json(&user)?,
                None => println!("Not signed in"),
            },
            SessionCommand::CheckUsername { username } => {
                let available = remote(&context)?.check_username(&username).await?;
                println!("{}", if available { "available" } else { "taken" });
            }
            SessionCommand::SetServer { .. } => {}
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
