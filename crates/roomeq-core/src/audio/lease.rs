//! Exclusive claims on device channels
//!
//! Playback and measurement sessions claim the (device, channel set) pairs
//! they drive. Overlapping claims on the same device are refused with
//! [`Error::DeviceConflict`]; a claim is released when its [`Lease`] drops.

use crate::error::{Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

type Claims = HashMap<u64, (String, BTreeSet<u16>)>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    claims: Claims,
}

/// Registry of active channel claims, shared between sessions
#[derive(Clone, Default)]
pub struct DeviceLeases {
    inner: Arc<Mutex<Registry>>,
}

/// An active claim; released on drop
pub struct Lease {
    id: u64,
    device: String,
    channels: BTreeSet<u16>,
    inner: Arc<Mutex<Registry>>,
}

impl DeviceLeases {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // A panic while holding the lock cannot leave the map half-updated
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Claim `channels` on `device`
    pub fn claim(&self, device: &str, channels: impl IntoIterator<Item = u16>) -> Result<Lease> {
        let channels: BTreeSet<u16> = channels.into_iter().collect();
        let mut reg = self.registry();

        let overlap: Vec<u16> = reg
            .claims
            .values()
            .filter(|(d, _)| d == device)
            .flat_map(|(_, held)| held.intersection(&channels).copied())
            .collect();
        if !overlap.is_empty() {
            return Err(Error::DeviceConflict {
                device: device.to_string(),
                channels: overlap,
            });
        }

        let id = reg.next_id;
        reg.next_id += 1;
        reg.claims
            .insert(id, (device.to_string(), channels.clone()));
        tracing::debug!(device, ?channels, "Channels claimed");

        Ok(Lease {
            id,
            device: device.to_string(),
            channels,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Number of live claims
    pub fn active(&self) -> usize {
        self.registry().claims.len()
    }
}

impl Lease {
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn channels(&self) -> &BTreeSet<u16> {
        &self.channels
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut reg = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        reg.claims.remove(&self.id);
        tracing::debug!(device = %self.device, "Channels released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disjoint_channels_coexist() {
        let leases = DeviceLeases::new();
        let _a = leases.claim("out", [0, 1]).unwrap();
        let _b = leases.claim("out", [2]).unwrap();
        let _c = leases.claim("other", [0]).unwrap();
        assert_eq!(leases.active(), 3);
    }

    #[test]
    fn test_overlap_is_conflict() {
        let leases = DeviceLeases::new();
        let _a = leases.claim("out", [0, 1]).unwrap();
        match leases.claim("out", [1, 2]) {
            Err(Error::DeviceConflict { device, channels }) => {
                assert_eq!(device, "out");
                assert_eq!(channels, vec![1]);
            }
            other => panic!("expected conflict, got {:?}", other.map(|l| l.id)),
        }
    }

    #[test]
    fn test_drop_releases() {
        let leases = DeviceLeases::new();
        let a = leases.claim("out", [0]).unwrap();
        drop(a);
        assert_eq!(leases.active(), 0);
        assert!(leases.claim("out", [0]).is_ok());
    }
}
