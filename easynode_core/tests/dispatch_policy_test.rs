// Drop-on-busy behavior of threaded subscriptions under concurrent delivery
use crossbeam::channel::{self, Receiver, Sender};
use easynode_core::communication::Message;
use easynode_core::core::{MemoryLogSink, NodeContext};
use easynode_core::dispatch::{
    DispatchOutcome, Dispatcher, ProcessingContext, ProcessingPolicy, SkipReason, Subscription,
};
use easynode_core::error::{EasyNodeError, EasyNodeResult};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn dispatcher() -> Dispatcher {
    Dispatcher::new(Arc::new(NodeContext::standalone(
        "detector",
        Arc::new(MemoryLogSink::new()),
    )))
}

fn threaded(name: &str) -> Subscription {
    Subscription::new(
        name,
        &format!("/detector/{}", name),
        "Image",
        1,
        ProcessingPolicy::ThreadedDrop,
    )
}

/// Handler that reports its start and then blocks until released
fn blocking_handler(
    started: Sender<()>,
    release: Receiver<()>,
) -> impl Fn(&ProcessingContext, &Message) -> EasyNodeResult<()> + Send + Sync {
    move |_ctx: &ProcessingContext, _msg: &Message| {
        let _ = started.send(());
        let _ = release.recv_timeout(WAIT);
        Ok(())
    }
}

#[test]
fn test_concurrent_burst_accepts_one() {
    const N: usize = 16;

    let (started_tx, started_rx) = channel::unbounded();
    let (release_tx, release_rx) = channel::unbounded();
    let mut d = dispatcher();
    d.add_route(
        threaded("image"),
        Some(Arc::new(blocking_handler(started_tx, release_rx))),
    )
    .unwrap();
    let d = Arc::new(d);

    let barrier = Arc::new(Barrier::new(N));
    let senders: Vec<_> = (0..N)
        .map(|i| {
            let d = Arc::clone(&d);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                d.dispatch("image", Message::new("Image", i)).unwrap()
            })
        })
        .collect();
    let outcomes: Vec<DispatchOutcome> = senders.into_iter().map(|h| h.join().unwrap()).collect();

    // The accepted handler blocks, so every other message found the guard held.
    started_rx.recv_timeout(WAIT).unwrap();
    let spawned = outcomes
        .iter()
        .filter(|o| **o == DispatchOutcome::Spawned)
        .count();
    let busy = outcomes
        .iter()
        .filter(|o| **o == DispatchOutcome::Skipped(SkipReason::Busy))
        .count();
    assert_eq!(spawned, 1);
    assert_eq!(busy, N - 1);

    release_tx.send(()).unwrap();
    assert!(d.wait_idle(WAIT));

    let stats = d.stats()["image"].clone();
    assert_eq!(stats.received, N as u64);
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.skipped, (N - 1) as u64);
    assert!(!stats.busy);
}

#[test]
fn test_guard_released_after_handler_error() {
    let mut d = dispatcher();
    d.add_route(
        threaded("image"),
        Some(Arc::new(
            |_: &ProcessingContext, msg: &Message| -> EasyNodeResult<()> {
                match msg.downcast_ref::<u32>() {
                    Some(0) => Err(EasyNodeError::handler("bad frame")),
                    _ => Ok(()),
                }
            },
        )),
    )
    .unwrap();

    assert_eq!(
        d.dispatch("image", Message::new("Image", 0u32)).unwrap(),
        DispatchOutcome::Spawned
    );
    assert!(d.wait_idle(WAIT));
    assert!(!d.state("image").unwrap().is_busy());

    assert_eq!(
        d.dispatch("image", Message::new("Image", 1u32)).unwrap(),
        DispatchOutcome::Spawned
    );
    assert!(d.wait_idle(WAIT));

    let stats = d.stats()["image"].clone();
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.skipped, 0);
}

#[test]
fn test_guard_released_after_handler_panic() {
    let sink = MemoryLogSink::new();
    let mut d = Dispatcher::new(Arc::new(NodeContext::standalone(
        "detector",
        Arc::new(sink.clone()),
    )));
    d.add_route(
        threaded("image"),
        Some(Arc::new(
            |ctx: &ProcessingContext, msg: &Message| -> EasyNodeResult<()> {
                let _p = ctx.phase("detection")?;
                if msg.is::<()>() {
                    panic!("detector exploded");
                }
                Ok(())
            },
        )),
    )
    .unwrap();

    d.dispatch("image", Message::new("Image", ())).unwrap();
    assert!(d.wait_idle(WAIT));
    assert_eq!(
        d.dispatch("image", Message::new("Image", 1u8)).unwrap(),
        DispatchOutcome::Spawned
    );
    assert!(d.wait_idle(WAIT));

    let stats = d.stats()["image"].clone();
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.failed, 1);
    // The phase closed during unwinding is still recorded.
    assert_eq!(stats.phases["detection"].count, 2);
    assert!(sink.contains(log::Level::Error, "detector exploded"));
}

#[test]
fn test_subscriptions_do_not_block_each_other() {
    let (started_tx, started_rx) = channel::unbounded();
    let (release_tx, release_rx) = channel::unbounded();
    let (other_tx, other_rx) = channel::unbounded::<()>();

    let mut d = dispatcher();
    d.add_route(
        threaded("image"),
        Some(Arc::new(blocking_handler(started_tx, release_rx))),
    )
    .unwrap();
    d.add_route(
        threaded("switch"),
        Some(Arc::new(
            move |_: &ProcessingContext, _: &Message| -> EasyNodeResult<()> {
                let _ = other_tx.send(());
                Ok(())
            },
        )),
    )
    .unwrap();

    d.dispatch("image", Message::new("Image", 1u8)).unwrap();
    started_rx.recv_timeout(WAIT).unwrap();

    // "image" is still in flight while "switch" runs to completion.
    assert_eq!(
        d.dispatch("switch", Message::new("Image", 2u8)).unwrap(),
        DispatchOutcome::Spawned
    );
    other_rx.recv_timeout(WAIT).unwrap();
    assert!(d.state("image").unwrap().is_busy());

    release_tx.send(()).unwrap();
    assert!(d.wait_idle(WAIT));
    assert_eq!(d.in_flight(), 0);
}
