use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a virtio-gpu device is already registered")]
pub struct RegistryError;

/// Admits at most one virtio-gpu device at a time.
///
/// The device model owns the registry and passes it to every [`crate::VirtioGpu::new`] call.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    claimed: Arc<AtomicBool>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self) -> Result<DeviceRegistration, RegistryError> {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RegistryError)?;
        Ok(DeviceRegistration {
            claimed: Arc::clone(&self.claimed),
        })
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

/// Proof of registration. Dropping it frees the slot.
#[derive(Debug)]
pub struct DeviceRegistration {
    claimed: Arc<AtomicBool>,
}

impl Drop for DeviceRegistration {
    fn drop(&mut self) {
        self.claimed.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn second_claim_fails_until_the_first_is_dropped() {
        let registry = DeviceRegistry::new();
        let first = registry.claim().unwrap();
        assert_eq!(registry.claim().unwrap_err(), RegistryError);
        assert!(registry.is_claimed());
        drop(first);
        assert!(!registry.is_claimed());
        let _second = registry.clone().claim().unwrap();
        assert!(registry.is_claimed());
    }
}
