use tracing::{debug, warn};

use knx_thermostat_common::{GroupTelegram, KnxBus, KnxError, PhysicalAddress};

/// KNX bus for host builds, which have no TP/IP interface attached.
/// Outbound telegrams are logged and nothing is ever received.
pub struct LoggingKnxBus {
    physical_address: PhysicalAddress,
    written: u64,
}

impl LoggingKnxBus {
    pub fn new(physical_address: PhysicalAddress) -> Self {
        warn!(
            "KNX enabled as {physical_address}, but this build has no KNX transport; \
             group writes are only logged"
        );
        Self {
            physical_address,
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl KnxBus for LoggingKnxBus {
    fn poll(&mut self) -> Option<GroupTelegram> {
        None
    }

    fn write(&mut self, telegram: GroupTelegram) -> Result<(), KnxError> {
        self.written += 1;
        debug!(
            "knx {} -> {}: {}",
            self.physical_address, telegram.address, telegram.value
        );
        Ok(())
    }
}
