mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rabbitvisor::broker::{ChannelRef, memory::MemoryBroker};
use rabbitvisor::{
    ConnectError, Consumer, Delivery, EventKind, GenerationError, HandlerFn, InitError, InitFn,
    InitializerError, InitializerRef, Queue, Scope, ServiceError,
};
use tokio_util::sync::CancellationToken;

use common::{ADDR, counting, fast_config, is_ready_gen, supervisor, wait_event};

#[tokio::test]
async fn init_returns_only_after_every_initializer_is_ready() {
    let broker = MemoryBroker::new();
    let sup = supervisor(&broker, fast_config(3, Duration::from_millis(10)));

    let done = Arc::new(AtomicUsize::new(0));
    let inits: Vec<InitializerRef> = (1..=3u64)
        .map(|i| {
            let done = Arc::clone(&done);
            let init: InitializerRef = InitFn::arc(format!("slow-{i}"), move |_ch: ChannelRef, _s: Scope| {
                let done = Arc::clone(&done);
                async move {
                    tokio::time::sleep(Duration::from_millis(20 * i)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
            init
        })
        .collect();

    let handle = sup.init(CancellationToken::new(), ADDR, inits).await.unwrap();
    assert_eq!(done.load(Ordering::SeqCst), 3);
    assert!(!handle.is_finished());

    handle.shutdown().await.unwrap();
    assert_eq!(broker.live_connections(), 0);
}

#[tokio::test]
async fn init_fails_fast_when_first_generation_fails() {
    let broker = MemoryBroker::new();
    let sup = supervisor(&broker, fast_config(3, Duration::from_millis(10)));

    let broken: InitializerRef = InitFn::arc("broken", |_ch: ChannelRef, _s: Scope| async {
        Err(InitializerError::fail("bad topology"))
    });
    let err = sup
        .init(CancellationToken::new(), ADDR, vec![broken])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        InitError::Generation(GenerationError::Initializer { ref initializer, .. }) if initializer == "broken"
    ));
    assert_eq!(broker.dial_count(), 1);
    assert_eq!(broker.live_connections(), 0);
}

#[tokio::test]
async fn exhausted_connect_runs_no_initializer() {
    let broker = MemoryBroker::new();
    broker.fail_next_dials(10);
    let sup = supervisor(&broker, fast_config(3, Duration::from_millis(5)));

    let calls = Arc::new(AtomicUsize::new(0));
    let res = sup
        .run(
            CancellationToken::new(),
            ADDR,
            vec![counting("never", Arc::clone(&calls))],
        )
        .await;

    match res {
        Err(ServiceError::Connect(ConnectError::Exhausted { attempts, addr, .. })) => {
            assert_eq!(attempts, 3);
            assert_eq!(addr, ADDR);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(broker.dial_count(), 3);
}

#[tokio::test]
async fn init_reports_exhausted_connect() {
    let broker = MemoryBroker::new();
    broker.fail_next_dials(2);
    let sup = supervisor(&broker, fast_config(2, Duration::from_millis(5)));

    let err = sup
        .init(CancellationToken::new(), ADDR, Vec::new())
        .await
        .unwrap_err();
    assert_eq!(err.as_label(), "connect_exhausted");
}

#[tokio::test]
async fn connection_loss_replays_every_initializer() {
    let broker = MemoryBroker::new();
    let sup = supervisor(&broker, fast_config(5, Duration::from_millis(10)));
    let mut events = sup.bus().subscribe();

    let calls = Arc::new(AtomicUsize::new(0));
    let queue = Queue::new("").exclusive(true);
    let consumer = Consumer::new(
        queue.clone(),
        HandlerFn::arc(|_d: Delivery| async {}),
        Default::default(),
    );

    let handle = sup
        .init(
            CancellationToken::new(),
            ADDR,
            vec![counting("topology", Arc::clone(&calls)), consumer],
        )
        .await
        .unwrap();
    let first = queue.name();
    assert!(first.starts_with("amq.gen-"));
    assert_eq!(broker.consumer_count(&first), 1);

    assert_eq!(broker.kill_connections("node restarted"), 1);
    let stopped = wait_event(&mut events, |ev| ev.kind == EventKind::GenerationStopped).await;
    assert_eq!(stopped.generation, Some(1));
    assert!(stopped.reason.is_some());
    wait_event(&mut events, is_ready_gen(2)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(broker.dial_count(), 2);
    assert_eq!(broker.live_connections(), 1);

    let second = queue.name();
    assert_ne!(first, second);
    assert!(!broker.queue_exists(&first));
    assert_eq!(broker.consumer_count(&second), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn consumer_stream_end_triggers_reconnect() {
    let broker = MemoryBroker::new();
    let sup = supervisor(&broker, fast_config(5, Duration::from_millis(10)));
    let mut events = sup.bus().subscribe();

    let queue = Queue::new("work").auto_delete(true);
    let consumer = Consumer::new(
        queue.clone(),
        HandlerFn::arc(|_d: Delivery| async {}),
        Default::default(),
    );
    let handle = sup
        .init(CancellationToken::new(), ADDR, vec![consumer])
        .await
        .unwrap();

    broker.kill_connections("gone");
    wait_event(&mut events, |ev| ev.kind == EventKind::Reconnecting).await;
    wait_event(&mut events, is_ready_gen(2)).await;
    assert_eq!(broker.consumer_count("work"), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn cancel_is_a_planned_shutdown() {
    let broker = MemoryBroker::new();
    let sup = supervisor(&broker, fast_config(5, Duration::from_millis(10)));
    let mut events = sup.bus().subscribe();

    let ctx = CancellationToken::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let run = {
        let sup = Arc::clone(&sup);
        let ctx = ctx.clone();
        let init = counting("once", Arc::clone(&calls));
        tokio::spawn(async move { sup.run(ctx, ADDR, vec![init]).await })
    };

    wait_event(&mut events, is_ready_gen(1)).await;
    ctx.cancel();
    assert!(run.await.unwrap().is_ok());

    let stopped = wait_event(&mut events, |ev| ev.kind == EventKind::GenerationStopped).await;
    assert!(stopped.reason.is_none());
    wait_event(&mut events, |ev| ev.kind == EventKind::ShutdownRequested).await;

    assert_eq!(broker.dial_count(), 1);
    assert_eq!(broker.live_connections(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancel_during_retry_pause_is_planned() {
    let broker = MemoryBroker::new();
    broker.fail_next_dials(100);
    let sup = supervisor(&broker, fast_config(100, Duration::from_secs(30)));

    let ctx = CancellationToken::new();
    let run = {
        let sup = Arc::clone(&sup);
        let ctx = ctx.clone();
        tokio::spawn(async move { sup.run(ctx, ADDR, Vec::new()).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    ctx.cancel();
    let res = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .unwrap()
        .unwrap();
    assert!(res.is_ok());
    assert_eq!(broker.dial_count(), 1);
}

#[tokio::test]
async fn channel_failure_reconnects_after_first_generation() {
    let broker = MemoryBroker::new();
    let sup = supervisor(&broker, fast_config(5, Duration::from_millis(10)));
    let mut events = sup.bus().subscribe();

    let calls = Arc::new(AtomicUsize::new(0));
    let handle = sup
        .init(
            CancellationToken::new(),
            ADDR,
            vec![counting("topology", Arc::clone(&calls))],
        )
        .await
        .unwrap();

    broker.fail_next_channels(1);
    broker.kill_connections("flap");
    let failed = wait_event(&mut events, |ev| ev.kind == EventKind::ChannelFailed).await;
    assert_eq!(failed.generation, Some(2));
    assert_eq!(failed.initializer.as_deref(), Some("topology"));

    wait_event(&mut events, is_ready_gen(3)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn failing_generations_are_spaced_by_the_connect_delay() {
    let broker = MemoryBroker::new();
    let delay = Duration::from_millis(50);
    let sup = supervisor(&broker, fast_config(5, delay));
    let mut events = sup.bus().subscribe();

    let calls = Arc::new(AtomicUsize::new(0));
    let flaky: InitializerRef = {
        let calls = Arc::clone(&calls);
        InitFn::arc("flaky", move |_ch: ChannelRef, _s: Scope| {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(())
                } else {
                    Err(InitializerError::fail("topology rejected"))
                }
            }
        })
    };
    let handle = sup
        .init(CancellationToken::new(), ADDR, vec![flaky])
        .await
        .unwrap();

    let started = std::time::Instant::now();
    broker.kill_connections("restart");
    let reconnecting = wait_event(&mut events, |ev| ev.kind == EventKind::Reconnecting).await;
    assert_eq!(reconnecting.delay_ms, Some(50));
    wait_event(&mut events, |ev| {
        ev.kind == EventKind::Connected && ev.generation == Some(4)
    })
    .await;

    assert!(started.elapsed() >= delay * 3);
    assert!((4..=5).contains(&broker.dial_count()));

    handle.shutdown().await.unwrap();
}
