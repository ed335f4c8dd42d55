//! Device-control boundary. The concrete protocol adapter (smart plug vendor
//! API, zigbee bridge, ...) implements [`OutletController`]; everything else
//! in the crate reaches it only through the execution bridge.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device unreachable: {0}")]
    Unreachable(String),
    #[error("protocol error on {device}: {message}")]
    Protocol { device: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum OutletState {
    On,
    Off,
    Unreachable,
}

/// Control surface for one device's outlets.
///
/// Implementations are not required to be safe for concurrent use across
/// independent executors; all calls are marshalled through the execution
/// bridge's single worker.
#[async_trait]
pub trait OutletController: Send + Sync {
    async fn turn_outlet(&self, device: &str, outlet: u8, on: bool) -> Result<(), DeviceError>;
    async fn query_state(&self, device: &str) -> Result<OutletState, DeviceError>;
}

/// Stand-in controller for builds without a protocol adapter; reports every
/// device as unreachable so decisions are logged but never applied silently.
pub struct NoopOutletController;

#[async_trait]
impl OutletController for NoopOutletController {
    async fn turn_outlet(&self, device: &str, _outlet: u8, _on: bool) -> Result<(), DeviceError> {
        Err(DeviceError::Unreachable(device.to_string()))
    }

    async fn query_state(&self, device: &str) -> Result<OutletState, DeviceError> {
        Err(DeviceError::Unreachable(device.to_string()))
    }
}

#[cfg(feature = "sim")]
pub use sim::SimulatedOutletBank;

#[cfg(feature = "sim")]
mod sim {
    use super::*;
    use rand::Rng;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// In-memory outlet bank for development and tests.
    ///
    /// Each call performs a read-sleep-write sequence so that overlapping
    /// callers would corrupt state, which is exactly what the execution
    /// bridge must prevent. The high-water mark of concurrent calls is
    /// tracked for assertions.
    pub struct SimulatedOutletBank {
        outlets: Mutex<HashMap<(String, u8), bool>>,
        latency: Duration,
        unreachable_device: Option<String>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl SimulatedOutletBank {
        pub fn new(latency: Duration) -> Self {
            Self {
                outlets: Mutex::new(HashMap::new()),
                latency,
                unreachable_device: None,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        /// Mark one device as unreachable to exercise apply-failure paths.
        pub fn with_unreachable_device(mut self, device: impl Into<String>) -> Self {
            self.unreachable_device = Some(device.into());
            self
        }

        pub async fn outlet_is_on(&self, device: &str, outlet: u8) -> bool {
            *self
                .outlets
                .lock()
                .await
                .get(&(device.to_string(), outlet))
                .unwrap_or(&false)
        }

        /// Highest number of calls ever observed in flight at once.
        pub fn max_concurrent_calls(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        fn enter(&self) -> CallGuard<'_> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            CallGuard { bank: self }
        }

        async fn protocol_delay(&self) {
            let jitter = rand::thread_rng().gen_range(0..=self.latency.as_millis() as u64);
            tokio::time::sleep(self.latency + Duration::from_millis(jitter)).await;
        }

        fn check_reachable(&self, device: &str) -> Result<(), DeviceError> {
            if self.unreachable_device.as_deref() == Some(device) {
                return Err(DeviceError::Unreachable(device.to_string()));
            }
            Ok(())
        }
    }

    struct CallGuard<'a> {
        bank: &'a SimulatedOutletBank,
    }

    impl Drop for CallGuard<'_> {
        fn drop(&mut self) {
            self.bank.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl OutletController for SimulatedOutletBank {
        async fn turn_outlet(&self, device: &str, outlet: u8, on: bool) -> Result<(), DeviceError> {
            let _guard = self.enter();
            self.check_reachable(device)?;
            // The delay sits between entry and the state write, so two
            // unserialized callers would be observed in flight together.
            self.protocol_delay().await;
            self.outlets
                .lock()
                .await
                .insert((device.to_string(), outlet), on);
            Ok(())
        }

        async fn query_state(&self, device: &str) -> Result<OutletState, DeviceError> {
            let _guard = self.enter();
            self.check_reachable(device)?;
            self.protocol_delay().await;
            let outlets = self.outlets.lock().await;
            let any_on = outlets
                .iter()
                .any(|((d, _), on)| d == device && *on);
            Ok(if any_on { OutletState::On } else { OutletState::Off })
        }
    }

}
