//! Session inspection: list, entries, and branching.

use clap::Subcommand;
use oxpilot_config::AppConfig;

#[derive(Subcommand)]
pub enum SessionsCommand {
    /// List sessions for this workspace, newest first
    List,

    /// List message entries of the most recent session
    Entries {
        /// Only show the most recent N entries
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Branch a new session off an entry of the most recent session
    Checkout {
        /// The entry id to branch from (see `sessions entries`)
        entry_id: String,
    },
}

pub async fn run(command: SessionsCommand) -> Result<(), Box<dyn std::error::Error>> {
    let cwd = std::env::current_dir()?;
    let cfg = AppConfig::load(&cwd)?;
    let store = super::build_store(&cfg);
    let cwd_str = cwd.to_string_lossy();

    match command {
        SessionsCommand::List => {
            let metas = store.list(&cwd_str)?;
            if metas.is_empty() {
                println!("no sessions for this workspace");
                return Ok(());
            }
            for meta in metas {
                match &meta.parent_id {
                    Some(parent) => println!("{}  (branched from {parent})", meta.id),
                    None => println!("{}", meta.id),
                }
            }
        }
        SessionsCommand::Entries { limit } => {
            let latest = store.continue_latest(&cwd_str)?;
            for entry in store.list_entries(&latest.file_path, limit)? {
                println!("{}  [{}] {}", entry.id, entry.role, entry.preview);
            }
        }
        SessionsCommand::Checkout { entry_id } => {
            let latest = store.continue_latest(&cwd_str)?;
            let model = latest.model.clone().unwrap_or_default();
            let branch = store.checkout_from_entry(
                &cwd_str,
                &latest.id,
                &latest.file_path,
                &entry_id,
                &model,
            )?;
            println!("created session {} from entry {entry_id}", branch.id);
        }
    }

    Ok(())
}
