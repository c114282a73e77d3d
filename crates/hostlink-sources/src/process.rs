//! Running process inventory

use crate::settings::IntervalSettings;
use async_trait::async_trait;
use chrono::Utc;
use hostlink_core::config::SourceConfig;
use hostlink_core::{AgentError, AgentResult, ErrorPolicy, EventBuffer, IntervalService, Record};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const SYSTEM_PROCESS_SCHEMA: &str = "System.Process";

/// Emits one `System.Process` record per running process
///
/// Enumeration touches every entry under `/proc` (or the platform
/// equivalent), so it runs on the blocking pool. A failed pass is logged
/// and the next interval tries again.
pub struct ProcessInformationService {
    buffer: Arc<dyn EventBuffer>,
    settings: IntervalSettings,
    system: Arc<Mutex<System>>,
}

impl ProcessInformationService {
    pub fn new(buffer: Arc<dyn EventBuffer>) -> Self {
        Self {
            buffer,
            settings: IntervalSettings::default(),
            system: Arc::new(Mutex::new(System::new())),
        }
    }
}

fn enumerate(system: &mut System) -> Vec<Record> {
    system.refresh_processes();

    let now = Utc::now();
    system
        .processes()
        .values()
        .map(|process| {
            let mut record = Record::with_timestamp(SYSTEM_PROCESS_SCHEMA, now)
                .with("Name", process.name())
                .with("Id", process.pid().as_u32())
                .with("Status", process.status().to_string())
                .with("CpuUsage", process.cpu_usage())
                .with("MemoryBytes", process.memory())
                .with("VirtualMemoryBytes", process.virtual_memory())
                .with("StartTime", process.start_time())
                .with("RunTimeSeconds", process.run_time());
            if let Some(parent) = process.parent() {
                record.insert("ParentId", parent.as_u32());
            }
            record
        })
        .collect()
}

#[async_trait]
impl IntervalService for ProcessInformationService {
    fn name(&self) -> &str {
        "ProcessInformation"
    }

    fn interval(&self) -> Duration {
        self.settings.interval()
    }

    fn is_enabled(&self) -> bool {
        self.settings.is_enabled()
    }

    fn error_policy(&self) -> ErrorPolicy {
        ErrorPolicy::Continue
    }

    async fn execute_single(&self, token: &CancellationToken) -> AgentResult<()> {
        let system = self.system.clone();
        let task = tokio::task::spawn_blocking(move || enumerate(&mut system.lock()));

        let records = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(AgentError::Cancelled),
            joined = task => joined
                .map_err(|e| AgentError::service(format!("process enumeration failed: {e}")))?,
        };

        debug!(count = records.len(), "Enumerated processes");
        for record in records {
            self.buffer.add(record);
        }
        Ok(())
    }

    fn update_configuration(&self, config: &SourceConfig) {
        if let SourceConfig::ProcessInformation(c) = config {
            self.settings.update(c);
        }
    }
}
