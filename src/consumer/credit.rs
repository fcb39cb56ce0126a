//! Flow-control credits
//!
//! The server only pushes commands while it holds permits granted by the
//! stream owner. A fresh stream grants [`FLOW_CONTROL_PERMITS`]; every
//! received command spends one, every acknowledgment earns one back. Earned
//! permits are re-announced in batches once half the grant has accumulated,
//! bounding the server's unacknowledged in-flight work to the grant size.

pub const FLOW_CONTROL_PERMITS: u64 = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditWindow {
    grant: u64,
    available: u64,
    unannounced: u64,
}

impl CreditWindow {
    pub fn new(grant: u64) -> Self {
        Self {
            grant,
            available: 0,
            unannounced: 0,
        }
    }

    /// Reset to a full grant and return the number of permits to announce.
    pub fn initial_grant(&mut self) -> u64 {
        self.available = self.grant;
        self.unannounced = 0;
        self.grant
    }

    pub fn on_receive(&mut self) {
        self.available = self.available.saturating_sub(1);
    }

    /// Record one acknowledgment. Returns the permits to re-announce when the
    /// replenish threshold is reached.
    pub fn on_ack(&mut self) -> Option<u64> {
        self.unannounced += 1;
        if self.unannounced < self.replenish_threshold() {
            return None;
        }
        let permits = std::mem::take(&mut self.unannounced);
        self.available += permits;
        Some(permits)
    }

    pub fn replenish_threshold(&self) -> u64 {
        (self.grant / 2).max(1)
    }

    /// Permits the server is currently believed to hold.
    pub fn available(&self) -> u64 {
        self.available
    }
}

impl Default for CreditWindow {
    fn default() -> Self {
        Self::new(FLOW_CONTROL_PERMITS)
    }
}
