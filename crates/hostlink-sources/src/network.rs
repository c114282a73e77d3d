//! Network interface counters

use crate::settings::IntervalSettings;
use async_trait::async_trait;
use chrono::Utc;
use hostlink_core::config::SourceConfig;
use hostlink_core::{AgentResult, EventBuffer, IntervalService, Record};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::Networks;
use tokio_util::sync::CancellationToken;

pub const SYSTEM_NETWORK_SCHEMA: &str = "System.Network";

/// Emits one `System.Network` record per interface with cumulative counters
pub struct NetworkInformationService {
    buffer: Arc<dyn EventBuffer>,
    settings: IntervalSettings,
    networks: Mutex<Networks>,
}

impl NetworkInformationService {
    pub fn new(buffer: Arc<dyn EventBuffer>) -> Self {
        Self {
            buffer,
            settings: IntervalSettings::default(),
            networks: Mutex::new(Networks::new()),
        }
    }

    fn collect(&self) -> Vec<Record> {
        let mut networks = self.networks.lock();
        networks.refresh_list();

        let now = Utc::now();
        networks
            .iter()
            .map(|(name, data)| {
                Record::with_timestamp(SYSTEM_NETWORK_SCHEMA, now)
                    .with("Name", name.as_str())
                    .with("MacAddress", data.mac_address().to_string())
                    .with("BytesReceived", data.total_received())
                    .with("BytesSent", data.total_transmitted())
                    .with("PacketsReceived", data.total_packets_received())
                    .with("PacketsSent", data.total_packets_transmitted())
                    .with("ErrorsReceived", data.total_errors_on_received())
                    .with("ErrorsSent", data.total_errors_on_transmitted())
            })
            .collect()
    }
}

#[async_trait]
impl IntervalService for NetworkInformationService {
    fn name(&self) -> &str {
        "NetworkInformation"
    }

    fn interval(&self) -> Duration {
        self.settings.interval()
    }

    fn is_enabled(&self) -> bool {
        self.settings.is_enabled()
    }

    async fn execute_single(&self, _token: &CancellationToken) -> AgentResult<()> {
        for record in self.collect() {
            self.buffer.add(record);
        }
        Ok(())
    }

    fn update_configuration(&self, config: &SourceConfig) {
        if let SourceConfig::NetworkInformation(c) = config {
            self.settings.update(c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostlink_core::InMemoryBuffer;

    #[tokio::test]
    async fn test_one_record_per_interface() {
        let buffer = Arc::new(InMemoryBuffer::new(1_000));
        let service = NetworkInformationService::new(buffer.clone());

        service
            .execute_single(&CancellationToken::new())
            .await
            .unwrap();

        let records = buffer.next(&CancellationToken::new());
        let mut names: Vec<&str> = records
            .iter()
            .filter_map(|r| r.get("Name").and_then(|v| v.as_str()))
            .collect();
        let total = names.len();
        names.dedup();
        assert_eq!(names.len(), total, "interfaces are reported once");
        assert!(records.iter().all(|r| r.schema() == SYSTEM_NETWORK_SCHEMA));
    }
}
