mod common;

use std::sync::Arc;
use std::time::Duration;

use rabbitvisor::broker::{ChannelRef, memory::MemoryBroker};
use rabbitvisor::{
    ConsumeOptions, Consumer, Delivery, EventKind, Exchange, HandlerFn, InitFn, InitializerRef,
    PublishError, PublishOptions, Publisher, Publishing, Queue, Scope,
};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use common::{ADDR, fast_config, is_ready_gen, supervisor, wait_event};

fn forward_ids(tx: mpsc::UnboundedSender<String>) -> Arc<dyn rabbitvisor::DeliveryHandler> {
    HandlerFn::arc(move |d: Delivery| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(d.message_id().unwrap_or_default().to_string());
        }
    })
}

#[tokio::test]
async fn messages_arrive_once_and_in_order() {
    let broker = MemoryBroker::new();
    let sup = supervisor(&broker, fast_config(3, Duration::from_millis(10)));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let consumer = Consumer::new(Queue::new("q"), forward_ids(tx), ConsumeOptions::default());
    let (publisher, publisher_init) = Publisher::new("q-publisher", PublishOptions::default());

    let handle = sup
        .init(CancellationToken::new(), ADDR, vec![consumer, publisher_init])
        .await
        .unwrap();

    for id in ["m1", "m2", "m3"] {
        publisher
            .publish("", "q", Publishing::new(id).with_message_id(id))
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        let id = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        seen.push(id);
    }
    assert_eq!(seen, ["m1", "m2", "m3"]);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(rx.try_recv().is_err());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn publisher_fails_fast_while_reconnecting_then_recovers() {
    let broker = MemoryBroker::new();
    let sup = supervisor(&broker, fast_config(5, Duration::from_millis(300)));
    let mut events = sup.bus().subscribe();

    let (publisher, publisher_init) = Publisher::new("events", PublishOptions::default());
    let handle = sup
        .init(CancellationToken::new(), ADDR, vec![publisher_init])
        .await
        .unwrap();
    assert_eq!(publisher.generation(), Some(1));

    broker.fail_next_dials(1);
    broker.kill_connections("maintenance");
    wait_event(&mut events, |ev| ev.kind == EventKind::ConnectFailed).await;

    assert!(!publisher.is_ready());
    let err = publisher
        .publish("", "nowhere", Publishing::new("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::NotReady { .. }));

    wait_event(&mut events, is_ready_gen(2)).await;
    assert_eq!(publisher.generation(), Some(2));
    publisher
        .publish("", "nowhere", Publishing::new("x"))
        .await
        .unwrap();

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn publisher_can_wait_for_the_next_generation() {
    let broker = MemoryBroker::new();
    let sup = supervisor(&broker, fast_config(5, Duration::from_millis(100)));
    let mut events = sup.bus().subscribe();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let consumer = Consumer::new(Queue::new("orders"), forward_ids(tx), ConsumeOptions::default());
    let (publisher, publisher_init) = Publisher::new(
        "orders-publisher",
        PublishOptions::default().ready_timeout(Duration::from_secs(3)),
    );
    let handle = sup
        .init(CancellationToken::new(), ADDR, vec![consumer, publisher_init])
        .await
        .unwrap();

    broker.fail_next_dials(1);
    broker.kill_connections("failover");
    wait_event(&mut events, |ev| ev.kind == EventKind::ConnectFailed).await;

    publisher
        .publish("", "orders", Publishing::new("x").with_message_id("late"))
        .await
        .unwrap();
    let id = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, "late");

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn work_replies_to_the_current_queue_name() {
    let broker = MemoryBroker::new();
    let sup = supervisor(&broker, fast_config(5, Duration::from_millis(10)));
    let mut events = sup.bus().subscribe();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = HandlerFn::arc(move |d: Delivery| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(d.reply_to().map(str::to_string));
        }
    });
    let queue = Queue::new("").exclusive(true);
    let (publisher, handle) = sup
        .work(CancellationToken::new(), ADDR, queue.clone(), handler)
        .await
        .unwrap();

    for generation in 1..=2u64 {
        if generation == 2 {
            broker.kill_connections("restart");
            wait_event(&mut events, is_ready_gen(2)).await;
        }
        let name = queue.name();
        publisher
            .publish("", &name, Publishing::new("ping"))
            .await
            .unwrap();
        let reply_to = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply_to.as_deref(), Some(name.as_str()));
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn manual_ack_and_receive_limits() {
    let broker = MemoryBroker::new();
    let sup = supervisor(&broker, fast_config(3, Duration::from_millis(10)));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = HandlerFn::arc(move |d: Delivery| {
        let tx = tx.clone();
        async move {
            let acked = d.ack(false).await.is_ok();
            let _ = tx.send(acked);
        }
    });
    let consumer = Consumer::new(
        Queue::new("acked").durable(true),
        handler,
        ConsumeOptions::default()
            .name("acker")
            .no_auto_ack()
            .receive_limits(5, 0),
    );
    let (publisher, publisher_init) = Publisher::new("p", PublishOptions::default());
    let handle = sup
        .init(CancellationToken::new(), ADDR, vec![consumer, publisher_init])
        .await
        .unwrap();

    publisher
        .publish("", "acked", Publishing::new("x"))
        .await
        .unwrap();
    assert!(rx.recv().await.unwrap());
    assert_eq!(broker.acked_count(), 1);
    assert_eq!(broker.last_qos(), Some((5, 0)));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn topology_is_redeclared_through_exchanges() {
    let broker = MemoryBroker::new();
    let sup = supervisor(&broker, fast_config(5, Duration::from_millis(10)));
    let mut events = sup.bus().subscribe();

    let queue = Queue::new("order-events").auto_delete(true);
    let topology: InitializerRef = {
        let queue = queue.clone();
        InitFn::arc("topology", move |ch: ChannelRef, scope: Scope| {
            let queue = queue.clone();
            async move {
                Exchange::new("events", "topic").declare(&*ch, false).await?;
                queue.declare(&*ch, &scope).await?;
                queue
                    .bind(&*ch, "events", "order.*", &Default::default())
                    .await?;
                Ok(())
            }
        })
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    let consumer = Consumer::new(queue.clone(), forward_ids(tx), ConsumeOptions::default());
    let (publisher, publisher_init) = Publisher::new(
        "events-publisher",
        PublishOptions::default().app_id("orders-service"),
    );

    let handle = sup
        .init(
            CancellationToken::new(),
            ADDR,
            vec![topology, consumer, publisher_init],
        )
        .await
        .unwrap();
    publisher
        .publish("events", "order.created", Publishing::new("{}").with_message_id("o1"))
        .await
        .unwrap();
    assert_eq!(rx.recv().await.as_deref(), Some("o1"));

    broker.kill_connections("restart");
    wait_event(&mut events, is_ready_gen(2)).await;
    publisher
        .publish("events", "order.paid", Publishing::new("{}").with_message_id("o2"))
        .await
        .unwrap();
    assert_eq!(rx.recv().await.as_deref(), Some("o2"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn fixed_queue_name_survives_reconnects() {
    let broker = MemoryBroker::new();
    let sup = supervisor(&broker, fast_config(5, Duration::from_millis(10)));
    let mut events = sup.bus().subscribe();

    let queue = Queue::new("jobs");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let consumer = Consumer::new(queue.clone(), forward_ids(tx), ConsumeOptions::default());
    let (publisher, publisher_init) = Publisher::new(
        "jobs-publisher",
        PublishOptions::default().reply_to_queue(queue.clone()),
    );
    let handle = sup
        .init(CancellationToken::new(), ADDR, vec![consumer, publisher_init])
        .await
        .unwrap();

    for generation in 1..=2u64 {
        if generation == 2 {
            broker.kill_connections("restart");
            wait_event(&mut events, is_ready_gen(2)).await;
        }
        assert_eq!(queue.name(), "jobs");
        assert_eq!(queue.declared_generation(), Some(generation));
        assert_eq!(broker.consumer_count("jobs"), 1);

        let id = format!("m{generation}");
        publisher
            .publish("", "jobs", Publishing::new("x").with_message_id(id.clone()))
            .await
            .unwrap();
        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, id);
    }
    assert_eq!(broker.queue_names(), ["jobs"]);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn reply_to_is_withheld_until_the_queue_is_redeclared() {
    let broker = MemoryBroker::new();
    let sup = supervisor(&broker, fast_config(5, Duration::from_millis(10)));
    let mut events = sup.bus().subscribe();

    let replies = Queue::new("").exclusive(true);
    let gate = Arc::new(Notify::new());
    let declare_replies: InitializerRef = {
        let replies = replies.clone();
        let gate = Arc::clone(&gate);
        InitFn::arc("replies", move |ch: ChannelRef, scope: Scope| {
            let replies = replies.clone();
            let gate = Arc::clone(&gate);
            async move {
                if scope.generation() > 1 {
                    gate.notified().await;
                }
                replies.declare(&*ch, &scope).await?;
                Ok(())
            }
        })
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let inbox = Consumer::new(
        Queue::new("inbox"),
        HandlerFn::arc(move |d: Delivery| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(d.reply_to().map(str::to_string));
            }
        }),
        ConsumeOptions::default(),
    );
    let (publisher, publisher_init) = Publisher::new(
        "requests",
        PublishOptions::default().reply_to_queue(replies.clone()),
    );
    let handle = sup
        .init(
            CancellationToken::new(),
            ADDR,
            vec![declare_replies, inbox, publisher_init],
        )
        .await
        .unwrap();

    publisher
        .publish("", "inbox", Publishing::new("req-1"))
        .await
        .unwrap();
    let first = rx.recv().await.unwrap().unwrap();
    assert_eq!(first, replies.name());

    broker.kill_connections("restart");
    wait_event(&mut events, |ev| {
        ev.kind == EventKind::InitializerReady
            && ev.generation == Some(2)
            && ev.initializer.as_deref() == Some("requests")
    })
    .await;
    assert_eq!(publisher.generation(), Some(2));
    assert!(!replies.is_declared());
    assert!(!broker.queue_exists(&first));

    let err = publisher
        .publish("", "inbox", Publishing::new("req-2"))
        .await
        .unwrap_err();
    assert!(err.is_not_ready());

    gate.notify_one();
    wait_event(&mut events, is_ready_gen(2)).await;
    publisher
        .publish("", "inbox", Publishing::new("req-3"))
        .await
        .unwrap();
    let second = rx.recv().await.unwrap().unwrap();
    assert_ne!(second, first);
    assert_eq!(second, replies.name());
    assert!(broker.queue_exists(&second));
    assert!(rx.try_recv().is_err());

    handle.shutdown().await.unwrap();
}
