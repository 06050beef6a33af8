use presence_discovery::{DiscoveryConfig, DiscoveryEngine, DiscoveryKind};
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Defaults overridable through PRESENCE_DISCOVERY_* variables
    let config = DiscoveryConfig::from_env()?;
    info!(
        "Watching {}:{} (lease {:?})",
        config.group(),
        config.port(),
        config.lease_window()
    );

    let engine = DiscoveryEngine::start(config).await?;
    let (_subscription, events) = engine.subscribe_channel();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv_async() => {
                let Ok(event) = event else { break };
                let instance = event.discoverable();
                match event.kind() {
                    DiscoveryKind::Lost => info!("LOST    {}", instance.identity()),
                    kind => info!(
                        "{:<7} {} {} pid={} url={}",
                        kind.to_string(),
                        instance.identity(),
                        instance.name().unwrap_or("<unnamed>"),
                        instance
                            .process_id()
                            .map_or_else(|| "?".to_string(), |pid| pid.to_string()),
                        instance.connector_address().unwrap_or("-"),
                    ),
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(30)) => {
                info!("{} instance(s) visible, {:?}", engine.snapshot().len(), engine.stats());
            }
        }
    }

    engine.stop().await?;
    info!("Stopped");
    Ok(())
}
