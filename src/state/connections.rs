use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Why a WebSocket connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// Counts open WebSocket connections globally and per client IP.
#[derive(Debug)]
pub struct ConnectionTracker {
    max_total: Option<usize>,
    max_per_ip: usize,
    total: AtomicUsize,
    per_ip: DashMap<IpAddr, usize>,
}

impl ConnectionTracker {
    pub fn new(max_total: Option<usize>, max_per_ip: usize) -> Self {
        Self {
            max_total,
            max_per_ip,
            total: AtomicUsize::new(0),
            per_ip: DashMap::new(),
        }
    }

    /// Reserve a slot for `ip`, checking the global limit first.
    pub fn try_acquire(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        let reserved = self
            .total
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| match self.max_total {
                Some(max) if current >= max => None,
                _ => Some(current + 1),
            });
        if reserved.is_err() {
            return Err(ConnectionLimitError::GlobalLimitReached);
        }

        let mut entry = self.per_ip.entry(ip).or_insert(0);
        if *entry >= self.max_per_ip {
            drop(entry);
            self.total.fetch_sub(1, Ordering::AcqRel);
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *entry += 1;
        Ok(())
    }

    pub fn release(&self, ip: IpAddr) {
        if let Entry::Occupied(mut entry) = self.per_ip.entry(ip) {
            if *entry.get() <= 1 {
                entry.remove();
            } else {
                *entry.get_mut() -= 1;
            }
            self.total.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    pub fn for_ip(&self, ip: &IpAddr) -> usize {
        self.per_ip.get(ip).map(|count| *count).unwrap_or(0)
    }
}
