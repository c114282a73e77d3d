//! Host environment snapshot

use crate::settings::IntervalSettings;
use async_trait::async_trait;
use hostlink_core::config::SourceConfig;
use hostlink_core::{AgentResult, EventBuffer, IntervalService, Record};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio_util::sync::CancellationToken;

pub const SYSTEM_ENVIRONMENT_SCHEMA: &str = "System.Environment";

/// Emits one `System.Environment` record per interval
pub struct SystemInformationService {
    buffer: Arc<dyn EventBuffer>,
    settings: IntervalSettings,
    system: Mutex<System>,
}

impl SystemInformationService {
    pub fn new(buffer: Arc<dyn EventBuffer>) -> Self {
        Self {
            buffer,
            settings: IntervalSettings::default(),
            system: Mutex::new(System::new()),
        }
    }

    fn snapshot(&self) -> Record {
        let mut system = self.system.lock();
        system.refresh_memory();

        let processor_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let process_path = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let current_directory = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let user_name = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();

        Record::new(SYSTEM_ENVIRONMENT_SCHEMA)
            .with("OSPlatform", std::env::consts::OS)
            .with("OSFamily", std::env::consts::FAMILY)
            .with("OSVersion", System::os_version().unwrap_or_default())
            .with("OSVersionString", System::long_os_version().unwrap_or_default())
            .with("KernelVersion", System::kernel_version().unwrap_or_default())
            .with("Architecture", std::env::consts::ARCH)
            .with("Is64BitProcess", cfg!(target_pointer_width = "64"))
            .with("ProcessorCount", processor_count)
            .with("ProcessId", std::process::id())
            .with("ProcessPath", process_path)
            .with("CurrentDirectory", current_directory)
            .with("CommandLine", std::env::args().collect::<Vec<_>>().join(" "))
            .with("UserName", user_name)
            .with("TotalMemoryBytes", system.total_memory())
            .with("UsedMemoryBytes", system.used_memory())
            .with("AvailableMemoryBytes", system.available_memory())
            .with("UptimeSeconds", System::uptime())
            .with("AgentVersion", hostlink_core::AGENT_VERSION)
    }
}

#[async_trait]
impl IntervalService for SystemInformationService {
    fn name(&self) -> &str {
        "SystemInformation"
    }

    fn interval(&self) -> Duration {
        self.settings.interval()
    }

    fn is_enabled(&self) -> bool {
        self.settings.is_enabled()
    }

    async fn execute_single(&self, _token: &CancellationToken) -> AgentResult<()> {
        self.buffer.add(self.snapshot());
        Ok(())
    }

    fn update_configuration(&self, config: &SourceConfig) {
        if let SourceConfig::SystemInformation(c) = config {
            self.settings.update(c);
        }
    }
}
