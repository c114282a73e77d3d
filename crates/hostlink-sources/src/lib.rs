//! Hostlink Sources - host collectors
//!
//! Each collector produces records into the shared buffer on its own
//! schedule:
//!
//! - **SystemInformation**: one `System.Environment` record per interval
//! - **DiskInformation**: one `System.Storage` record per mounted disk
//! - **NetworkInformation**: one `System.Network` record per interface
//! - **ProcessInformation**: one `System.Process` record per process
//! - **UdpListener**: records pushed by local applications as JSON datagrams
//!
//! [`default_factories`] registers all of them under their configuration
//! type names.

pub mod disk;
pub mod network;
pub mod process;
mod settings;
pub mod system;
pub mod udp;

pub use disk::DiskInformationService;
pub use network::NetworkInformationService;
pub use process::ProcessInformationService;
pub use system::SystemInformationService;
pub use udp::UdpListenerService;

use hostlink_core::{CollectorFactories, IntervalRunner, IntervalService, Service};
use std::sync::Arc;

fn interval<T: IntervalService + 'static>(service: T) -> Arc<dyn Service> {
    Arc::new(IntervalRunner::new(service))
}

/// Factories for every built-in collector
pub fn default_factories() -> CollectorFactories {
    CollectorFactories::builder()
        .register("SystemInformation", |buffer| {
            interval(SystemInformationService::new(buffer))
        })
        .register("DiskInformation", |buffer| {
            interval(DiskInformationService::new(buffer))
        })
        .register("NetworkInformation", |buffer| {
            interval(NetworkInformationService::new(buffer))
        })
        .register("ProcessInformation", |buffer| {
            interval(ProcessInformationService::new(buffer))
        })
        .register("UdpListener", |buffer| {
            Arc::new(UdpListenerService::new(buffer)) as Arc<dyn Service>
        })
        .build()
}
