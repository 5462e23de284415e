//! Bus implementations for replay
//!
//! - `VirtualBus`: in-process loopback with an optional simulated ECU
//! - `SocketCanBus`: raw SocketCAN sockets (Linux, `socketcan` feature)

pub mod virtual_bus;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

pub use virtual_bus::{SentFrame, VirtualBus};

use std::sync::Arc;

use canreplay_core::{BusSink, TransportError};

use crate::config::TransportConfig;

/// Create a bus from configuration
pub fn create_bus(config: &TransportConfig) -> Result<Arc<dyn BusSink>, TransportError> {
    match config {
        TransportConfig::Virtual(cfg) => Ok(Arc::new(VirtualBus::new(cfg))),
        #[cfg(all(target_os = "linux", feature = "socketcan"))]
        TransportConfig::SocketCan(cfg) => Ok(Arc::new(socketcan::SocketCanBus::new(cfg)?)),
        #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
        TransportConfig::SocketCan(_) => Err(TransportError::Unsupported(
            "SocketCAN requires Linux and the 'socketcan' feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VirtualBusConfig;

    #[tokio::test]
    async fn test_create_virtual_bus() {
        let bus = create_bus(&TransportConfig::Virtual(VirtualBusConfig::default())).unwrap();
        assert_eq!(bus.name(), "virtual");
        assert!(bus.is_connected().await);
    }
}
