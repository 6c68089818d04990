use std::time::Duration;

use crate::error::{Error, Result};
use crate::framer::HEADER_SIZE;

/// Hard ceiling on a single transfer's payload, matching the constrained
/// peer's reassembly buffer.
pub const DEFAULT_MAX_TOTAL_DATA_SIZE: usize = 64 * 1024;

/// Hard ceiling on chunk count per transfer (~64KB / 168-byte chunks).
pub const DEFAULT_MAX_CHUNKS_PER_TRANSFER: usize = 365;

/// Tunables for a [`crate::session::Session`], built once and held immutable
/// for the session's lifetime.
///
/// Constructed via [`TransportConfig::default`] and `with_*` setters; invalid
/// combinations are rejected by [`TransportConfig::validate`], which every
/// setter and [`crate::session::Session::new`] calls.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub(crate) ack_timeout: Duration,
    pub(crate) chunk_timeout: Option<Duration>,
    pub(crate) max_retries: u32,
    pub(crate) inter_chunk_delay: Duration,
    pub(crate) mtu: u16,
    pub(crate) max_total_data_size: usize,
    pub(crate) max_chunks_per_transfer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            ack_timeout: Duration::from_secs_f64(2.0),
            chunk_timeout: Some(Duration::from_secs_f64(15.0)),
            max_retries: 3,
            inter_chunk_delay: Duration::from_millis(10),
            mtu: 185,
            max_total_data_size: DEFAULT_MAX_TOTAL_DATA_SIZE,
            max_chunks_per_transfer: DEFAULT_MAX_CHUNKS_PER_TRANSFER,
        }
    }
}

impl TransportConfig {
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// `None` or a non-positive duration disables the chunk quiescence timeout.
    pub fn with_chunk_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.chunk_timeout = timeout.filter(|d| !d.is_zero());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_inter_chunk_delay(mut self, delay: Duration) -> Self {
        self.inter_chunk_delay = delay;
        self
    }

    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_max_total_data_size(mut self, size: usize) -> Self {
        self.max_total_data_size = size;
        self
    }

    pub fn with_max_chunks_per_transfer(mut self, max: usize) -> Self {
        self.max_chunks_per_transfer = max;
        self
    }

    /// The maximum payload bytes carried by one chunk: `mtu - HEADER_SIZE`.
    pub fn chunk_size(&self) -> usize {
        self.mtu as usize - HEADER_SIZE
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn max_total_data_size(&self) -> usize {
        self.max_total_data_size
    }

    pub fn max_chunks_per_transfer(&self) -> usize {
        self.max_chunks_per_transfer
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    pub fn chunk_timeout(&self) -> Option<Duration> {
        self.chunk_timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn inter_chunk_delay(&self) -> Duration {
        self.inter_chunk_delay
    }

    pub fn validate(&self) -> Result<()> {
        if (self.mtu as usize) <= HEADER_SIZE {
            return Err(Error::Config(format!(
                "mtu ({}) must be greater than HEADER_SIZE ({HEADER_SIZE})",
                self.mtu
            )));
        }
        if self.chunk_size() > u8::MAX as usize {
            return Err(Error::Config(format!(
                "chunk_size ({}) exceeds the 1-byte data_size field's range",
                self.chunk_size()
            )));
        }
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".into()));
        }
        if self.max_total_data_size == 0 {
            return Err(Error::Config("max_total_data_size must be nonzero".into()));
        }
        if self.max_chunks_per_transfer == 0 {
            return Err(Error::Config(
                "max_chunks_per_transfer must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        TransportConfig::default().validate().expect("valid");
    }

    #[test]
    fn mtu_too_small_is_rejected() {
        let cfg = TransportConfig::default().with_mtu(10);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn chunk_size_over_u8_is_rejected() {
        let cfg = TransportConfig::default().with_mtu(600);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_retries_is_rejected() {
        let cfg = TransportConfig::default().with_max_retries(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn chunk_timeout_zero_disables() {
        let cfg = TransportConfig::default().with_chunk_timeout(Some(Duration::ZERO));
        assert_eq!(cfg.chunk_timeout(), None);
    }
}
