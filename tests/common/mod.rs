#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rabbitvisor::broker::{ChannelRef, memory::MemoryBroker};
use rabbitvisor::{
    ConnectorConfig, Event, EventKind, InitFn, InitializerRef, Scope, Supervisor, SupervisorConfig,
};
use tokio::sync::broadcast;

pub const ADDR: &str = "memory://test";

/// Config with short retry delays so reconnect tests stay fast.
pub fn fast_config(max_attempts: u32, delay: Duration) -> SupervisorConfig {
    SupervisorConfig {
        connector: ConnectorConfig {
            max_attempts,
            delay,
        },
        grace: Duration::from_millis(200),
        ..Default::default()
    }
}

pub fn supervisor(broker: &MemoryBroker, cfg: SupervisorConfig) -> Arc<Supervisor> {
    Supervisor::builder(broker.clone()).with_config(cfg).build()
}

/// Initializer that only counts its invocations.
pub fn counting(name: &'static str, calls: Arc<AtomicUsize>) -> InitializerRef {
    InitFn::arc(name, move |_ch: ChannelRef, _scope: Scope| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

/// Waits (bounded) for the first event matching `pred`.
pub async fn wait_event(
    rx: &mut broadcast::Receiver<Event>,
    pred: impl Fn(&Event) -> bool,
) -> Event {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(ev) if pred(&ev) => return ev,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("bus closed"),
            }
        }
    })
    .await
    .expect("event did not arrive in time")
}

pub fn is_ready_gen(generation: u64) -> impl Fn(&Event) -> bool {
    move |ev| ev.kind == EventKind::GenerationReady && ev.generation == Some(generation)
}
