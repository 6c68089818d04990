use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Queryable transport counters, shared (not owned) by a
/// [`crate::session::Session`] so a caller can read them from another thread
/// while the session's event loop runs.
#[derive(Default, Debug)]
pub struct Statistics {
    total_data_sent: AtomicU64,
    total_data_received: AtomicU64,
    crc_errors: AtomicU64,
    timeouts: AtomicU64,
    successful_transfers: AtomicU64,
    ack_timeouts: AtomicU64,
    retransmissions: AtomicU64,
    last_transfer_time: AtomicU64,
}

impl Statistics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn add_data_sent(&self, n: usize) {
        self.total_data_sent.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_data_received(&self, n: usize) {
        self.total_data_received
            .fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn inc_crc_errors(&self) {
        self.crc_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_ack_timeouts(&self) {
        self.ack_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_retransmissions(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_successful_transfer(&self) {
        self.successful_transfers.fetch_add(1, Ordering::Relaxed);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.last_transfer_time.store(now, Ordering::Relaxed);
    }

    pub fn total_data_sent(&self) -> u64 {
        self.total_data_sent.load(Ordering::Relaxed)
    }

    pub fn total_data_received(&self) -> u64 {
        self.total_data_received.load(Ordering::Relaxed)
    }

    pub fn crc_errors(&self) -> u64 {
        self.crc_errors.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn successful_transfers(&self) -> u64 {
        self.successful_transfers.load(Ordering::Relaxed)
    }

    pub fn ack_timeouts(&self) -> u64 {
        self.ack_timeouts.load(Ordering::Relaxed)
    }

    pub fn retransmissions(&self) -> u64 {
        self.retransmissions.load(Ordering::Relaxed)
    }

    pub fn last_transfer_time(&self) -> u64 {
        self.last_transfer_time.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.total_data_sent.store(0, Ordering::Relaxed);
        self.total_data_received.store(0, Ordering::Relaxed);
        self.crc_errors.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.successful_transfers.store(0, Ordering::Relaxed);
        self.ack_timeouts.store(0, Ordering::Relaxed);
        self.retransmissions.store(0, Ordering::Relaxed);
        self.last_transfer_time.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_reset() {
        let stats = Statistics::new();
        stats.add_data_sent(10);
        stats.inc_crc_errors();
        stats.mark_successful_transfer();
        assert_eq!(stats.total_data_sent(), 10);
        assert_eq!(stats.crc_errors(), 1);
        assert_eq!(stats.successful_transfers(), 1);

        stats.reset();
        assert_eq!(stats.total_data_sent(), 0);
        assert_eq!(stats.crc_errors(), 0);
        assert_eq!(stats.successful_transfers(), 0);
    }
}
