use anyhow::Result;
use relay_config::Config;

/// Rejects configurations the relays cannot be started with.
pub fn check_config(config: &Config) -> Result<()> {
    if config.http_relays().is_empty() {
        anyhow::bail!("no relays configured, add at least one entry to `http_relays`");
    }

    for relay in config.http_relays() {
        if relay.outputs.is_empty() {
            relay_log::warn!("relay {:?} has no outputs configured", relay.name());
        }
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        relay_log::info!("launching relay without config folder");
    } else {
        relay_log::info!(
            "launching relay from config folder {}",
            config.path().display()
        );
    }

    for relay in config.http_relays() {
        relay_log::info!(
            "  relay {:?} on {} with {} outputs",
            relay.name(),
            relay.bind_addr,
            relay.outputs.len()
        );
    }
    relay_log::info!("  log level: {}", config.logging().level.as_str());
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) {
    let Some(host) = config.statsd_addr() else {
        return;
    };

    relay_statsd::init(
        config.metrics_prefix(),
        host,
        config.metrics_default_tags().clone(),
    );
}
