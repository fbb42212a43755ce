//! lsnpd — serverless LSNP peer daemon.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use lsnp_core::config::LsnpConfig;
use lsnp_services::LogGameSink;

use lsnpd::commands::{self, Outcome};
use lsnpd::controller::Controller;
use lsnpd::discovery::Discovery;
use lsnpd::transport::Transport;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = LsnpConfig::load().context("failed to load configuration")?;
    tracing::info!(
        user = %config.identity.user,
        display_name = %config.identity.display_name,
        port = config.network.port,
        "lsnpd starting"
    );

    // Bind failure is the one fatal startup error.
    let broadcast_override = config
        .network
        .broadcast_addr
        .parse()
        .ok();
    let transport = Arc::new(
        Transport::bind(config.network.port, broadcast_override)
            .await
            .context("failed to bind peer socket")?,
    );

    let (controller, outbound_rx) = Controller::new(&config, transport, Arc::new(LogGameSink));
    tracing::info!(me = %controller.me, "peer identity ready");

    let discovery = match Discovery::start(
        &controller.me,
        &controller.display_name,
        controller.transport.port(),
        controller.registry.clone(),
    ) {
        Ok(d) => Some(d),
        // A peer without mDNS still works through broadcast discovery.
        Err(e) => {
            tracing::warn!(error = %e, "mDNS unavailable, relying on broadcast discovery");
            None
        }
    };

    let receive_task = tokio::spawn(controller.clone().run_receive());
    let send_pump_task = tokio::spawn(controller.clone().run_send_pump(outbound_rx));
    let retry_task = tokio::spawn(controller.clone().run_retry());
    let periodic_task = tokio::spawn(controller.clone().run_periodic());
    let housekeeping_task = tokio::spawn(controller.clone().run_housekeeping());

    // The user task: one command per stdin line, replies on stdout.
    let command_controller = controller.clone();
    let command_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            let command = match commands::parse(&line) {
                Ok(command) => command,
                Err(usage) => {
                    println!("{usage}");
                    continue;
                }
            };
            match commands::execute(&command_controller, command).await {
                Ok(Outcome::Reply(reply)) => println!("{reply}"),
                Ok(Outcome::Quit) => return,
                Err(e) => println!("error: {e}"),
            }
        }
    });

    tokio::select! {
        _ = command_task => tracing::info!("quit requested"),
        r = receive_task => tracing::error!("receive task exited: {r:?}"),
        r = send_pump_task => tracing::error!("send pump exited: {r:?}"),
        r = retry_task => tracing::error!("retry task exited: {r:?}"),
        r = periodic_task => tracing::error!("periodic task exited: {r:?}"),
        r = housekeeping_task => tracing::error!("housekeeping task exited: {r:?}"),
    }

    if let Some(discovery) = discovery {
        discovery.shutdown();
    }
    tracing::info!("lsnpd stopped");
    Ok(())
}
