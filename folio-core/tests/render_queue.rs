mod support;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use folio_core::{JobPriority, RenderError, RenderJob, RenderQueue};
use folio_model::InvoiceId;
use tokio::sync::Semaphore;
use support::wait_until;

const PATIENCE: Duration = Duration::from_secs(5);

fn job() -> RenderJob {
    RenderJob::new(InvoiceId::new(), false)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn never_more_than_k_jobs_run() {
    let queue = Arc::new(RenderQueue::new(2, PATIENCE));
    let gate = Arc::new(Semaphore::new(0));
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let (queue, gate, current, peak) =
            (queue.clone(), gate.clone(), current.clone(), peak.clone());
        tasks.push(tokio::spawn(async move {
            queue
                .submit(job(), || async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    let permit = gate.acquire().await.map_err(|_| RenderError::QueueClosed)?;
                    permit.forget();
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, RenderError>(())
                })
                .await
        }));
    }

    assert!(
        wait_until(PATIENCE, || {
            let s = queue.stats();
            s.running == 2 && s.waiting == 4
        })
        .await
    );

    // One release admits exactly one waiter.
    gate.add_permits(1);
    assert!(wait_until(PATIENCE, || queue.stats().completed == 1).await);
    assert!(wait_until(PATIENCE, || queue.stats().running == 2).await);
    assert_eq!(queue.stats().waiting, 3);

    gate.add_permits(5);
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(queue.stats().completed, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn waiters_are_admitted_in_arrival_order() {
    let queue = Arc::new(RenderQueue::new(1, PATIENCE));
    let order = Arc::new(Mutex::new(Vec::new()));
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let holder = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .submit(job(), || async move {
                    let _ = release_rx.await;
                    Ok::<_, RenderError>(())
                })
                .await
        })
    };
    assert!(wait_until(PATIENCE, || queue.stats().running == 1).await);

    let mut waiters = Vec::new();
    for i in 0..4usize {
        let (waiter_queue, order) = (queue.clone(), order.clone());
        // Admin jobs get no precedence over earlier arrivals.
        let priority = if i == 3 { JobPriority::Admin } else { JobPriority::Normal };
        waiters.push(tokio::spawn(async move {
            waiter_queue
                .submit(job().with_priority(priority), || async move {
                    order.lock().unwrap().push(i);
                    Ok::<_, RenderError>(())
                })
                .await
        }));
        assert!(wait_until(PATIENCE, || queue.stats().waiting == i + 1).await);
        // Let the waiter register with the semaphore before the next arrives.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    release_tx.send(()).unwrap();
    holder.await.unwrap().unwrap();
    for waiter in waiters {
        waiter.await.unwrap().unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timed_out_waiter_is_never_admitted() {
    let queue = Arc::new(RenderQueue::new(1, Duration::from_millis(100)));
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let holder = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .submit(job(), || async move {
                    let _ = release_rx.await;
                    Ok::<_, RenderError>(())
                })
                .await
        })
    };
    assert!(wait_until(PATIENCE, || queue.stats().running == 1).await);

    let ran = Arc::new(AtomicBool::new(false));
    let waiter_job = job();
    let waiter_id = waiter_job.id;
    let err = {
        let ran = ran.clone();
        queue
            .submit(waiter_job, || async move {
                ran.store(true, Ordering::SeqCst);
                Ok::<_, RenderError>(())
            })
            .await
            .unwrap_err()
    };
    match err {
        RenderError::QueueTimeout { job_id, waited } => {
            assert_eq!(job_id, waiter_id);
            assert!(waited >= Duration::from_millis(100));
        }
        other => panic!("expected a queue timeout, got {other:?}"),
    }

    release_tx.send(()).unwrap();
    holder.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!ran.load(Ordering::SeqCst));
    assert!(queue.job_state(&waiter_id).is_none());
    let stats = queue.stats();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.waiting, 0);
    assert_eq!(stats.completed, 1);
}
