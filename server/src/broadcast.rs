//! Periodic telemetry fan-out.
//!
//! On a fixed interval the broadcaster advances the vehicle simulation one
//! step, encodes a single telemetry frame, and pushes it to every active
//! session from a registry snapshot. A failed write prunes exactly that
//! session; other sessions and the broadcaster itself are unaffected.

use crate::sessions::SessionRegistry;
use crate::vehicle::Vehicle;
use log::{debug, info, warn};
use shared::encode_telemetry;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Runs broadcast cycles until the shutdown signal fires.
pub async fn run_broadcaster(
    registry: Arc<RwLock<SessionRegistry>>,
    vehicle: Arc<Mutex<Vehicle>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // The first tick fires immediately; skip it so the first broadcast
    // happens one full period after startup.
    timer.tick().await;

    info!("Broadcaster started ({:?} period)", period);

    loop {
        tokio::select! {
            _ = timer.tick() => {}
            _ = shutdown.changed() => {
                info!("Broadcaster stopping");
                break;
            }
        }
        broadcast_once(&registry, &vehicle).await;
    }
}

/// One broadcast pass: tick the simulation, snapshot the sessions, deliver
/// the frame to each. Returns the number of successful deliveries.
///
/// Sessions unregistered between snapshot and send are skipped via the
/// `contains` check; sessions registered after the snapshot catch the next
/// cycle.
pub async fn broadcast_once(
    registry: &Arc<RwLock<SessionRegistry>>,
    vehicle: &Arc<Mutex<Vehicle>>,
) -> usize {
    let frame = {
        let mut v = vehicle.lock().await;
        v.tick(&mut rand::thread_rng());
        encode_telemetry(&v.snapshot())
    };

    let sessions = registry.read().await.snapshot();
    let mut delivered = 0;

    for (id, writer) in sessions {
        if !registry.read().await.contains(id) {
            continue;
        }

        let result = writer.lock().await.write_all(frame.as_bytes()).await;
        match result {
            Ok(()) => delivered += 1,
            Err(e) => {
                warn!("Session {} dropped during broadcast: {}", id, e);
                registry.write().await.unregister(id);
            }
        }
    }

    debug!("Telemetry sent to {} sessions", delivered);
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionWriter;
    use shared::{Message, MessageType};
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn writer_pair() -> (SessionWriter, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        let (_, write_half) = server_side.into_split();
        (Arc::new(Mutex::new(write_half)), client)
    }

    async fn read_frame(stream: &mut TcpStream) -> Message {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 2048];
        loop {
            if let Some((msg, consumed)) = Message::parse(&buf).unwrap() {
                buf.drain(..consumed);
                return msg;
            }
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before a full frame arrived");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_all_active_sessions() {
        let registry = Arc::new(RwLock::new(SessionRegistry::new(4)));
        let vehicle = Arc::new(Mutex::new(Vehicle::new()));

        let (w1, mut c1) = writer_pair().await;
        let (w2, mut c2) = writer_pair().await;
        {
            let mut reg = registry.write().await;
            reg.register("127.0.0.1:1001".parse().unwrap(), w1).unwrap();
            reg.register("127.0.0.1:1002".parse().unwrap(), w2).unwrap();
        }

        let delivered = broadcast_once(&registry, &vehicle).await;
        assert_eq!(delivered, 2);

        for client in [&mut c1, &mut c2] {
            let msg = read_frame(client).await;
            assert_eq!(msg.kind, MessageType::TelemetryData);
            assert!(msg.body.unwrap().contains("Direction: NORTH"));
        }
    }

    #[tokio::test]
    async fn test_broadcast_skips_unregistered_session() {
        let registry = Arc::new(RwLock::new(SessionRegistry::new(4)));
        let vehicle = Arc::new(Mutex::new(Vehicle::new()));

        let (w1, mut c1) = writer_pair().await;
        let (w2, _c2) = writer_pair().await;
        let id2 = {
            let mut reg = registry.write().await;
            reg.register("127.0.0.1:1001".parse().unwrap(), w1).unwrap();
            reg.register("127.0.0.1:1002".parse().unwrap(), w2).unwrap()
        };

        registry.write().await.unregister(id2);

        let delivered = broadcast_once(&registry, &vehicle).await;
        assert_eq!(delivered, 1);

        let msg = read_frame(&mut c1).await;
        assert_eq!(msg.kind, MessageType::TelemetryData);
    }

    #[tokio::test]
    async fn test_broadcast_prunes_session_with_closed_socket() {
        let registry = Arc::new(RwLock::new(SessionRegistry::new(4)));
        let vehicle = Arc::new(Mutex::new(Vehicle::new()));

        let (w1, mut c1) = writer_pair().await;
        let (w2, c2) = writer_pair().await;
        let (id1, id2) = {
            let mut reg = registry.write().await;
            let id1 = reg.register("127.0.0.1:1001".parse().unwrap(), w1).unwrap();
            let id2 = reg.register("127.0.0.1:1002".parse().unwrap(), w2).unwrap();
            (id1, id2)
        };

        drop(c2);

        // The first write after the peer closes may still succeed while the
        // reset is in flight, so give the failure a few cycles to surface.
        for _ in 0..10 {
            broadcast_once(&registry, &vehicle).await;
            if !registry.read().await.contains(id2) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert!(!registry.read().await.contains(id2));
        assert!(registry.read().await.contains(id1));

        let msg = read_frame(&mut c1).await;
        assert_eq!(msg.kind, MessageType::TelemetryData);
    }

    #[tokio::test]
    async fn test_broadcast_ticks_simulation() {
        let registry = Arc::new(RwLock::new(SessionRegistry::new(4)));
        let mut state = shared::VehicleState::new();
        state.speed = 20.0;
        state.is_moving = true;
        let vehicle = Arc::new(Mutex::new(Vehicle::with_state(state)));

        broadcast_once(&registry, &vehicle).await;

        // One drain step while moving.
        let after = vehicle.lock().await.snapshot();
        assert!((after.battery - 99.5).abs() < 1e-4);
    }
}
