//! # tavola-discover
//!
//! Runs the handheld discovery cascade once and prints the hub address.
//!
//! ```text
//! tavola-discover                 print ws://<hub>/ws?type=waiter, exit 1 if none
//! tavola-discover --forget        clear the cached address first
//! tavola-discover --listen ROLE   stay attached as ROLE and print every event
//! ```

use std::process::ExitCode;

use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tavola_core::Role;
use tavola_sync::{
    hub_url, Discovery, DiscoveryCache, HubClient, HubClientConfig, SyncError, TavolaConfig,
};

struct Args {
    forget: bool,
    listen: Option<Role>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        forget: false,
        listen: None,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--forget" => args.forget = true,
            "--listen" => {
                let role = iter.next().context("--listen needs a role")?;
                args.listen = Some(role.parse()?);
            }
            other => bail!("Unknown argument: {}", other),
        }
    }

    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let config = TavolaConfig::load_or_default(None);

    let discovery = Discovery::new(config.discovery.clone(), config.hub.port)?;

    if args.forget {
        let cache = config
            .discovery
            .cache_path
            .clone()
            .or_else(DiscoveryCache::default_path)
            .map(DiscoveryCache::new);
        if let Some(cache) = cache {
            cache.clear()?;
            info!(path = ?cache.path(), "Cached hub address cleared");
        }
    }

    let addr = match discovery.discover_or_err().await {
        Ok(addr) => addr,
        Err(SyncError::NoServerFound) => {
            eprintln!("No hub found on this network");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    let role = args.listen.unwrap_or(Role::Waiter);
    let url = hub_url(addr, role)?;
    println!("{}", url);

    if args.listen.is_none() {
        return Ok(ExitCode::SUCCESS);
    }

    let (client, mut events) =
        HubClient::spawn(HubClientConfig::new(url).with_settings(&config.client));

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(message) => match message.encode() {
                    Ok(json) => println!("{}", json),
                    Err(e) => warn!(?e, "Failed to encode event"),
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                client.shutdown().await?;
                break;
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
