use super::*;
use std::sync::Arc;

#[tokio::test]
async fn test_same_context_nests() {
    let lock = Reentrant::new(0u32);
    let ctx = ExecContext::new("a");

    let outer = lock.acquire(&ctx, Duration::from_millis(10)).await.unwrap();
    assert!(outer.is_outermost());

    let inner = lock.acquire(&ctx, Duration::from_millis(10)).await.unwrap();
    assert_eq!(inner.depth(), 2);
    assert!(!inner.is_outermost());

    *inner.state() += 1;
    drop(inner);

    assert!(lock.is_held_by(&ctx));
    assert_eq!(*outer.state(), 1);
    drop(outer);

    assert_eq!(lock.owner(), None);
    assert_eq!(lock.depth(), 0);
}

#[tokio::test]
async fn test_other_context_times_out() {
    let lock = Reentrant::new(());
    let a = ExecContext::new("a");
    let b = ExecContext::new("b");

    let _held = lock.try_acquire(&a).unwrap();
    assert!(lock.try_acquire(&b).is_none());
    assert!(lock.acquire(&b, Duration::from_millis(20)).await.is_none());
    assert!(lock.is_held_by(&a));
}

#[tokio::test]
async fn test_reacquire_keeps_ownership_until_last_drop() {
    let lock = Reentrant::new(());
    let a = ExecContext::new("a");
    let b = ExecContext::new("b");

    let first = lock.try_acquire(&a).unwrap();
    let second = first.reacquire();
    drop(first);
    assert!(lock.try_acquire(&b).is_none());

    drop(second);
    assert!(lock.try_acquire(&b).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_waiter_wakes_on_release() {
    let lock = Arc::new(Reentrant::new(Vec::<&'static str>::new()));

    let holder_ctx = ExecContext::new("holder");
    let guard = lock.try_acquire(&holder_ctx).unwrap();

    let waiter_lock = Arc::clone(&lock);
    let waiter = tokio::spawn(async move {
        let ctx = ExecContext::new("waiter");
        match waiter_lock.acquire(&ctx, Duration::from_secs(5)).await {
            Some(guard) => {
                guard.state().push("waiter");
                true
            }
            None => false,
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    guard.state().push("holder");
    drop(guard);

    assert!(waiter.await.unwrap());
    let guard = lock.try_acquire(&holder_ctx).unwrap();
    assert_eq!(*guard.state(), vec!["holder", "waiter"]);
}

#[test]
fn test_context_ids_are_unique() {
    let a = ExecContext::new("a");
    let b = ExecContext::new("a");
    assert_ne!(a.id(), b.id());
    assert_ne!(a.id(), 0);
    assert_eq!(a.label(), "a");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_context_never_loses_ownership_while_held() {
    let lock = Arc::new(Reentrant::new(()));
    let ctx = Arc::new(ExecContext::new("shared"));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                for _ in 0..2_000 {
                    let guard = lock.try_acquire(&ctx).unwrap();
                    assert!(lock.is_held_by(&ctx));
                    assert!(guard.depth() >= 1);
                    tokio::task::yield_now().await;
                    assert!(lock.is_held_by(&ctx));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.await.unwrap();
    }

    assert_eq!(lock.owner(), None);
    assert_eq!(lock.depth(), 0);
    let other = ExecContext::new("other");
    assert!(lock.try_acquire(&other).is_some());
}
