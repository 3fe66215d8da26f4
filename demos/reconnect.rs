//! # Reconnect Example
//!
//! Runs a consumer on a server-named queue, then kills the broker connection a
//! few times. Each time the supervisor dials again, replays the initializers
//! and the queue gets a new generated name.
//!
//! A custom subscriber prints the generation lifecycle.
//!
//! ## Run
//! ```bash
//! cargo run --example reconnect --features memory
//! ```

use std::{
    sync::Arc,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use anyhow::Context;
use rabbitvisor::broker::memory::MemoryBroker;
use rabbitvisor::{
    ConnectorConfig, Consumer, Delivery, Event, EventKind, HandlerFn, PublishOptions, Publisher,
    Publishing, Queue, Subscribe, Supervisor, SupervisorConfig,
};
use tokio_util::sync::CancellationToken;

struct Lifecycle {
    reconnects: AtomicU64,
}

#[async_trait::async_trait]
impl Subscribe for Lifecycle {
    async fn on_event(&self, ev: &Event) {
        let generation = ev.generation.unwrap_or_default();
        match ev.kind {
            EventKind::GenerationReady => println!(" ├─► generation {generation} ready"),
            EventKind::GenerationStopped => println!(
                " ├─► generation {generation} stopped: {}",
                ev.reason.as_deref().unwrap_or("planned")
            ),
            EventKind::ConnectFailed => println!(
                " ├─► dial attempt {} failed, retrying in {}ms",
                ev.attempt.unwrap_or_default(),
                ev.delay_ms.unwrap_or_default()
            ),
            EventKind::Reconnecting => {
                self.reconnects.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "lifecycle"
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let broker = MemoryBroker::new();
    let lifecycle = Arc::new(Lifecycle {
        reconnects: AtomicU64::new(0),
    });

    let cfg = SupervisorConfig {
        connector: ConnectorConfig {
            max_attempts: 5,
            delay: Duration::from_millis(200),
        },
        ..Default::default()
    };
    let subs: Vec<Arc<dyn Subscribe>> = vec![lifecycle.clone()];
    let sup = Supervisor::builder(broker.clone())
        .with_config(cfg)
        .with_subscribers(subs)
        .build();

    let queue = Queue::new("").exclusive(true);
    let consumer = Consumer::new(
        queue.clone(),
        HandlerFn::arc(|d: Delivery| async move {
            println!(" │     received {:?}", String::from_utf8_lossy(&d.body));
        }),
        Default::default(),
    );
    let (publisher, publisher_init) = Publisher::new("pinger", PublishOptions::default().timestamp());

    println!("Lifecycle:");
    let handle = sup
        .init(
            CancellationToken::new(),
            "memory://local",
            vec![consumer, publisher_init],
        )
        .await
        .context("first generation never became ready")?;

    for round in 1..=3 {
        let name = queue.name();
        println!(" │   queue name: {name}");
        publisher
            .publish("", &name, Publishing::new(format!("ping {round}")))
            .await
            .with_context(|| format!("ping {round} to {name}"))?;
        tokio::time::sleep(Duration::from_millis(50)).await;

        if round == 2 {
            broker.fail_next_dials(1);
        }
        broker.kill_connections("broker restarted");

        match publisher.publish("", &name, Publishing::new("lost")).await {
            Err(e) => println!(" │   publish during reconnect: {e}"),
            Ok(()) => println!(" │   publish raced the teardown"),
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    handle.shutdown().await.context("supervisor loop failed")?;
    println!(
        " └─► reconnects: {}",
        lifecycle.reconnects.load(Ordering::Relaxed)
    );
    Ok(())
}
