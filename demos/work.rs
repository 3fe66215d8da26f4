//! # Work Example
//!
//! Registers one consumer and one publisher with `Supervisor::work` against the
//! in-memory broker, publishes a few jobs and prints what the consumer receives.
//!
//! ## Run
//! ```bash
//! cargo run --example work --features memory
//! ```

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use rabbitvisor::broker::memory::MemoryBroker;
use rabbitvisor::{Delivery, HandlerFn, LogWriter, Publishing, Queue, Subscribe, Supervisor};
use tokio_util::sync::CancellationToken;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rabbitvisor=debug".into()),
        )
        .init();

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::default())];
    let sup = Supervisor::builder(MemoryBroker::new())
        .with_subscribers(subs)
        .build();

    let handler = HandlerFn::arc(|d: Delivery| async move {
        println!(
            " ├─► job {} ({} bytes, reply-to {})",
            d.message_id().unwrap_or("-"),
            d.body.len(),
            d.reply_to().unwrap_or("-"),
        );
    });

    let (publisher, handle) = sup
        .work(
            CancellationToken::new(),
            "memory://local",
            Queue::new("jobs"),
            handler,
        )
        .await
        .context("first generation never became ready")?;

    println!("Publishing:");
    for i in 1..=3 {
        let id = format!("job-{i}");
        publisher
            .publish("", "jobs", Publishing::new(format!("payload {i}")).with_message_id(id.clone()))
            .await
            .with_context(|| format!("publishing {id}"))?;
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    println!(" └─► done");
    handle.shutdown().await.context("supervisor loop failed")?;
    Ok(())
}
