//! Mounted storage inventory

use crate::settings::IntervalSettings;
use async_trait::async_trait;
use chrono::Utc;
use hostlink_core::config::SourceConfig;
use hostlink_core::{AgentResult, EventBuffer, IntervalService, Record};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::Disks;
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub const SYSTEM_STORAGE_SCHEMA: &str = "System.Storage";

/// Emits one `System.Storage` record per mounted disk
pub struct DiskInformationService {
    buffer: Arc<dyn EventBuffer>,
    settings: IntervalSettings,
    disks: Mutex<Disks>,
}

impl DiskInformationService {
    pub fn new(buffer: Arc<dyn EventBuffer>) -> Self {
        Self {
            buffer,
            settings: IntervalSettings::default(),
            disks: Mutex::new(Disks::new()),
        }
    }

    fn collect(&self) -> Vec<Record> {
        let mut disks = self.disks.lock();
        // Pick up mounts added since the last tick
        disks.refresh_list();

        let now = Utc::now();
        disks
            .iter()
            .map(|disk| {
                let name = disk.name().to_string_lossy().to_string();
                let kind = format!("{:?}", disk.kind());
                trace!("Found drive: {} - {}", name, kind);

                Record::with_timestamp(SYSTEM_STORAGE_SCHEMA, now)
                    .with("Name", name)
                    .with("Type", kind)
                    .with("RootDir", disk.mount_point().display().to_string())
                    .with("TotalSizeBytes", disk.total_space())
                    .with("AvailableFreespaceBytes", disk.available_space())
                    .with("IsRemovable", disk.is_removable())
                    .with("Format", disk.file_system().to_string_lossy().to_string())
            })
            .collect()
    }
}

#[async_trait]
impl IntervalService for DiskInformationService {
    fn name(&self) -> &str {
        "DiskInformation"
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
        if let SourceConfig::DiskInformation(c) = config {
            self.settings.update(c);
        }
    }
}
