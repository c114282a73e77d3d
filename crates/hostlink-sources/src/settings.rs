use hostlink_core::config::IntervalSourceConfig;
use parking_lot::RwLock;
use std::time::Duration;

/// Live interval settings of one collector, replaced on reload
#[derive(Debug, Default)]
pub(crate) struct IntervalSettings {
    config: RwLock<IntervalSourceConfig>,
}

impl IntervalSettings {
    pub(crate) fn interval(&self) -> Duration {
        self.config.read().interval
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.config.read().enabled
    }

    pub(crate) fn update(&self, config: &IntervalSourceConfig) {
        *self.config.write() = config.clone();
    }
}
