use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::statsd::RelayCounters;

type Counts = BTreeMap<String, BTreeMap<String, u64>>;

/// Counts received datapoints per organization and machine.
#[derive(Debug, Default)]
pub struct Metering {
    counts: Mutex<Counts>,
}

impl Metering {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `count` datapoints for the given organization and machine.
    pub fn record(&self, org_id: &str, machine_id: &str, count: u64) {
        let mut counts = self.counts.lock();
        let machines = counts.entry(org_id.to_owned()).or_default();
        *machines.entry(machine_id.to_owned()).or_default() += count;
    }

    /// Takes all counts recorded since the last drain.
    pub fn drain(&self) -> Counts {
        std::mem::take(&mut *self.counts.lock())
    }

    /// Drains the counters and reports them.
    pub fn report(&self, relay: &str) {
        for (org_id, machines) in self.drain() {
            let total: u64 = machines.values().sum();
            relay_log::info!(
                "metering for relay {relay:?}: org {org_id:?} sent {total} datapoints from {} machines",
                machines.len()
            );
            relay_statsd::metric!(
                counter(RelayCounters::MeteringPoints) += total as i64,
                org = &org_id,
            );
        }
    }

    /// Reports the counters every `interval` until `cancel` fires.
    pub async fn run(&self, relay: String, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.report(&relay),
            }
        }

        relay_log::debug!("metering report of relay {relay:?} stopped");
    }
}
