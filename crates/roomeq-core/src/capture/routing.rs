//! Logical → physical channel routing for one device role

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Channel routing table bounded by the device's channel count
///
/// Logical channel `i` maps to `assignments[i]`. The table starts as the
/// identity mapping and every assignment stays below the channel count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingMatrix {
    assignments: Vec<usize>,
}

impl RoutingMatrix {
    /// Identity mapping over `channel_count` channels
    pub fn create(channel_count: usize) -> Self {
        Self {
            assignments: (0..channel_count).collect(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.assignments.len()
    }

    /// Resize, keeping assignments below `min(old, new)` and defaulting new
    /// indices to identity
    ///
    /// Kept assignments that point past the new channel count fall back to
    /// identity as well, so the table never holds an out-of-range channel.
    pub fn update_channel_count(&mut self, channel_count: usize) {
        let old = self.assignments.len();
        self.assignments.truncate(channel_count);
        for (logical, physical) in self.assignments.iter_mut().enumerate() {
            if *physical >= channel_count {
                *physical = logical;
            }
        }
        self.assignments.extend(old.min(channel_count)..channel_count);
    }

    /// Route `logical` to `physical`
    pub fn set_assignment(&mut self, logical: usize, physical: usize) -> Result<()> {
        let channel_count = self.assignments.len();
        if physical >= channel_count {
            return Err(Error::OutOfRange {
                physical,
                channel_count,
            });
        }
        let slot = self
            .assignments
            .get_mut(logical)
            .ok_or_else(|| {
                Error::InvalidRouting(format!(
                    "logical channel {logical} does not exist ({channel_count} channels)"
                ))
            })?;
        *slot = physical;
        Ok(())
    }

    /// Physical channel for `logical`, if the logical channel exists
    pub fn get_assignment(&self, logical: usize) -> Option<usize> {
        self.assignments.get(logical).copied()
    }

    /// All assignments in logical order
    pub fn assignments(&self) -> &[usize] {
        &self.assignments
    }

    /// Check the table against a device with `device_channels` channels
    pub fn validate_against(&self, device_channels: usize) -> Result<()> {
        match self.assignments.iter().find(|&&p| p >= device_channels) {
            Some(&physical) => Err(Error::InvalidRouting(format!(
                "physical channel {physical} exceeds device channel count {device_channels}"
            ))),
            None => Ok(()),
        }
    }
}

/// Routing tables for both device roles of a measurement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRouting {
    pub input: RoutingMatrix,
    pub output: RoutingMatrix,
}

impl CaptureRouting {
    /// Identity routing for devices with the given channel counts
    pub fn identity(input_channels: usize, output_channels: usize) -> Self {
        Self {
            input: RoutingMatrix::create(input_channels),
            output: RoutingMatrix::create(output_channels),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_on_create() {
        let m = RoutingMatrix::create(4);
        assert_eq!(m.assignments(), &[0, 1, 2, 3]);
        assert_eq!(m.get_assignment(3), Some(3));
        assert_eq!(m.get_assignment(4), None);
    }

    #[test]
    fn test_out_of_range_never_mutates() {
        let mut m = RoutingMatrix::create(2);
        m.set_assignment(0, 1).unwrap();
        let before = m.clone();
        for physical in [2, 3, 100] {
            assert!(matches!(
                m.set_assignment(0, physical),
                Err(Error::OutOfRange { .. })
            ));
        }
        assert!(m.set_assignment(5, 0).is_err());
        assert_eq!(m, before);
    }

    #[test]
    fn test_resize_preserves_prefix() {
        let mut m = RoutingMatrix::create(4);
        m.set_assignment(0, 3).unwrap();
        m.set_assignment(1, 2).unwrap();

        m.update_channel_count(6);
        assert_eq!(m.assignments(), &[3, 2, 2, 3, 4, 5]);

        m.update_channel_count(2);
        // Logical 0 pointed at physical 3, which no longer exists
        assert_eq!(m.assignments(), &[0, 1]);
        m.validate_against(2).unwrap();
    }

    #[test]
    fn test_deterministic_sequence() {
        let run = || {
            let mut m = RoutingMatrix::create(3);
            m.set_assignment(2, 0).unwrap();
            m.update_channel_count(5);
            let _ = m.set_assignment(1, 9);
            m.update_channel_count(4);
            m
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_validate_against_smaller_device() {
        let m = RoutingMatrix::create(4);
        assert!(matches!(
            m.validate_against(2),
            Err(Error::InvalidRouting(_))
        ));
    }
}
