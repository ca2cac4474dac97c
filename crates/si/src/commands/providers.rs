use crate::output;
use clap::Subcommand;
use si_providers::registry;
use si_runtime::{ProviderId, RuntimeError};

#[derive(Subcommand, Debug, Clone)]
pub enum ProvidersCommands {
    /// Known providers with their auth style and limits
    List {
        #[arg(long)]
        json: bool,
    },
    /// Request counters and breaker state seen by this process
    Health {
        /// Only this provider
        provider: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

pub fn handle(command: &ProvidersCommands) -> anyhow::Result<()> {
    match command {
        ProvidersCommands::List { json } => {
            let rows = registry::provider_list();
            if *json {
                output::print_json(rows)
            } else {
                println!("{}", registry::render_list(rows));
                Ok(())
            }
        }
        ProvidersCommands::Health { provider, json } => {
            let provider = match provider.as_deref() {
                Some(raw) => Some(
                    ProviderId::parse(raw)
                        .ok_or_else(|| RuntimeError::usage(format!("unknown provider: {raw}")))?,
                ),
                None => None,
            };
            let entries = registry::health(provider);
            if *json {
                output::print_json(&entries)
            } else {
                println!("{}", registry::render_health(&entries));
                Ok(())
            }
        }
    }
}
