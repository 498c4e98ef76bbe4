use std::sync::Arc;

use anyhow::Context as _;
use tokio_stream::StreamExt as _;
use tokio_util::sync::CancellationToken;

use lurk_twitch::{ChatEvent, Dialer, Manager, WebSocket};

pub mod config;
pub mod control;
pub mod filter;
pub mod roster;
pub mod sink;

use crate::{config::Config, control::Controller, filter::BotFilter, roster::JsonRoster};

/// Reads chat from every channel in the roster until `shutdown` is cancelled.
pub async fn run(config: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let sink = sink::from_format(config.sink.format);
    run_with(config, Arc::new(WebSocket), sink, shutdown).await
}

pub async fn run_with(
    config: Config,
    dialer: Arc<dyn Dialer>,
    sink: Box<dyn sink::Sink>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let roster = Arc::new(JsonRoster::load(&config.roster.path).await?);
    let filter = BotFilter::new(&config.filter)?;

    log::info!(
        "using {} as {} (up to {} channels per connection)",
        config.twitch.address,
        config.twitch.name,
        config.twitch.channel_cap
    );
    let (manager, mut messages) = Manager::new(config.twitch, dialer, shutdown.clone());

    if let Some(address) = &config.control.address {
        let listener = tokio::net::TcpListener::bind(address)
            .await
            .with_context(|| format!("cannot bind the control listener to {address}"))?;
        log::info!("control listener is on {}", listener.local_addr()?);

        let controller = Controller::new(manager.clone(), roster.clone());
        tokio::spawn(control::serve(listener, controller, shutdown.clone()));
    }

    let restore = tokio::spawn({
        let manager = manager.clone();
        let roster = roster.clone();
        async move {
            match manager.connect_all_from_roster(&*roster).await {
                Ok(()) => log::info!("joined every channel in the roster"),
                Err(err) => log::error!("could not restore the roster: {err:#}"),
            }
        }
    });

    loop {
        let pm = tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(pm) = messages.next() => pm,
            else => break,
        };

        let event = ChatEvent::from(&pm);
        if filter.is_ignored(&event.user) {
            log::trace!("ignoring {} in {}", event.user, event.channel);
            continue;
        }

        if let Err(err) = sink.publish(&event).await {
            log::warn!("could not publish a message from {}: {err:#}", event.channel);
        }
    }

    restore.abort();
    log::info!("stopped reading chat");
    Ok(())
}
