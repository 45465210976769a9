use bytes::Bytes;
use nble::transport::{
    CharacteristicProperties, GattCharacteristic, GattService, TransportEvent,
    DEVICE_INFORMATION_SERVICE, SOFTWARE_REVISION_CHARACTERISTIC,
};
use nble::{BleDevice, GattStatus, LoggingObserver, MemoryRegistry, SimTransport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

/// Notifying characteristic of the demo peer
const HEART_RATE_MEASUREMENT: Uuid = Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);
const HEART_RATE_SERVICE: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "00:11:22:AA:BB:CC".into());

    let sim = SimTransport::auto_responding();
    sim.set_device_name(Some("Band-7F21"));
    sim.set_services(vec![
        GattService::new(
            HEART_RATE_SERVICE,
            vec![GattCharacteristic::notifiable(HEART_RATE_MEASUREMENT)],
        ),
        GattService::new(
            DEVICE_INFORMATION_SERVICE,
            vec![GattCharacteristic::new(
                SOFTWARE_REVISION_CHARACTERISTIC,
                CharacteristicProperties::READ,
            )],
        ),
    ]);
    sim.set_value(SOFTWARE_REVISION_CHARACTERISTIC, &b"1.4.2"[..]);

    let registry = Arc::new(MemoryRegistry::new());
    registry.register_observer(
        "Band",
        Arc::new(LoggingObserver::new(vec![HEART_RATE_MEASUREMENT])),
    );

    let device = BleDevice::builder(address, "Band")
        .maintain(true)
        .build(Arc::new(sim.clone()), registry.clone());

    info!("Device {} starting on simulated transport", device.address());

    if !device.connect().await {
        warn!("Connect rejected for {}", device.address());
        return;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    device.read_software_revision().await;
    device.request_remote_rssi().await;
    sim.emit(TransportEvent::CharacteristicChanged {
        characteristic: HEART_RATE_MEASUREMENT,
        value: Bytes::from_static(&[0x00, 72]),
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    info!("Simulating link loss");
    sim.set_accept_reconnect(false);
    sim.drop_link(GattStatus::SUCCESS);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    info!("Status after recovery: {}", device.connection_status().await);

    device.disconnect().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    device.shutdown().await;

    info!("Audit trail for {}:", device.address());
    for record in device.status_records() {
        info!("  {} {}", record.timestamp_ms, record.kind);
    }
}
