pub mod config;
pub mod file_lock;
pub mod prompt;

use anyhow::Context;
use clap::{ArgAction, Parser};
use connectivity::agent::{SecretAgent, SecretAgentService};
use connectivity::monitoring::links::LinkEvent;
use connectivity::types::constants::secret_agent::DEFAULT_IDENTIFIER;
use connectivity::{ConnectivityManager, Counter, FileSettingsStore};
use log::{debug, info, warn};
use std::sync::Arc;
use zbus::Connection;

use crate::config::settings_dir;
use crate::file_lock::acquire_service_lock;
use crate::prompt::NotificationPrompt;

#[derive(Parser, Debug)]
#[command(name = "connectivity-service")]
#[command(disable_version_flag = true)]
#[command(version)]
struct Args {
    #[arg(short = 'V', long = "version", action = ArgAction::SetTrue)]
    version: bool,

    /// Print this process's unique bus name once it is up.
    #[arg(long)]
    print_address: bool,

    /// Identifier the secret agent registers under.
    #[arg(long, default_value = DEFAULT_IDENTIFIER)]
    agent_identifier: String,

    /// Run without the secret agent.
    #[arg(long)]
    no_agent: bool,
}

/// Message bus a part of the service talks on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bus {
    System,
    Session,
}

/// NetworkManager, oFono and the secret agent live on the system bus.
const NETWORKING_BUS: Bus = Bus::System;
/// The notification daemon belongs to the user's session.
const PROMPT_BUS: Bus = Bus::Session;

impl Bus {
    async fn connect(self) -> anyhow::Result<Connection> {
        match self {
            Self::System => Connection::system()
                .await
                .context("Failed to connect to the system bus"),
            Self::Session => Connection::session()
                .await
                .context("Failed to connect to the session bus"),
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.version {
        println!("connectivity-service {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let _lock = acquire_service_lock()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    runtime.block_on(serve(args))
}

async fn serve(args: Args) -> anyhow::Result<()> {
    let conn = NETWORKING_BUS.connect().await?;

    let dir = settings_dir()?;
    info!("Settings in {}", dir.display());
    let store = FileSettingsStore::open(&dir)?;
    let manager = ConnectivityManager::new(&conn, Box::new(store)).await?;

    let agent = if args.no_agent {
        None
    } else {
        let session = PROMPT_BUS.connect().await?;
        let prompt = Arc::new(NotificationPrompt::new(&session).await?);
        let agent = SecretAgent::new(prompt, Counter::starting_at(1));
        let service = SecretAgentService::start(&conn, agent, &args.agent_identifier)
            .await
            .context("Failed to register the secret agent")?;
        Some(service)
    };

    if args.print_address
        && let Some(name) = conn.unique_name()
    {
        println!("{name}");
    }

    let mut links = manager.links().subscribe();
    info!("Networking is {}", manager.networking_status());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal.context("Failed to wait for Ctrl-C")?;
                break;
            }
            event = links.recv() => match event {
                Some(LinkEvent::NetworkingStatusChanged(status)) => info!("Networking is {status}"),
                Some(event) => debug!("{event:?}"),
                None => break,
            },
        }
    }

    info!("Shutting down");
    if let Some(agent) = agent
        && let Err(e) = agent.stop().await
    {
        warn!("Failed to unregister the secret agent: {e}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_go_to_the_session_bus() {
        assert_eq!(PROMPT_BUS, Bus::Session);
        assert_eq!(NETWORKING_BUS, Bus::System);
        assert_ne!(PROMPT_BUS, NETWORKING_BUS);
    }
}
