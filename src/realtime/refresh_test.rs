//! Tests for refresh coalescing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::refresh::{RefreshController, RefreshError};

const FETCH_TIME: Duration = Duration::from_millis(100);

fn slow_controller() -> RefreshController {
    RefreshController::new(|| async {
        tokio::time::sleep(FETCH_TIME).await;
        Ok::<(), String>(())
    })
}

#[tokio::test(start_paused = true)]
async fn test_single_request_runs_one_fetch() {
    let controller = slow_controller();

    assert!(controller.request_refresh().await.is_ok());
    assert_eq!(controller.fetch_count(), 1);
    assert!(!controller.is_refreshing());
}

#[tokio::test(start_paused = true)]
async fn test_requests_during_fetch_coalesce_into_one_trailing_fetch() {
    let controller = slow_controller();

    let first = tokio::spawn({
        let controller = controller.clone();
        async move { controller.request_refresh().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(controller.is_refreshing());

    let waiting: Vec<_> = (0..5)
        .map(|_| {
            let controller = controller.clone();
            tokio::spawn(async move { controller.request_refresh().await })
        })
        .collect();

    assert!(first.await.unwrap().is_ok());
    for handle in waiting {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(controller.fetch_count(), 2);
    assert!(!controller.is_refreshing());
}

#[tokio::test(start_paused = true)]
async fn test_sequential_requests_each_fetch() {
    let controller = slow_controller();

    for _ in 0..3 {
        controller.request_refresh().await.unwrap();
    }
    assert_eq!(controller.fetch_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_failure_is_reported_and_next_request_retries() {
    let calls = Arc::new(AtomicU32::new(0));
    let controller = RefreshController::new({
        let calls = Arc::clone(&calls);
        move || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(FETCH_TIME).await;
                if call == 0 {
                    Err("upstream unavailable".to_string())
                } else {
                    Ok(())
                }
            }
        }
    });

    assert_eq!(
        controller.request_refresh().await,
        Err(RefreshError::Failed {
            message: "upstream unavailable".to_string()
        })
    );
    assert!(!controller.is_refreshing());
    assert_eq!(controller.request_refresh().await, Ok(()));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_fetch_does_not_wedge_controller() {
    let calls = Arc::new(AtomicU32::new(0));
    let controller = RefreshController::new({
        let calls = Arc::clone(&calls);
        move || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    panic!("fetch blew up");
                }
                Ok::<(), String>(())
            }
        }
    });

    assert!(matches!(
        controller.request_refresh().await,
        Err(RefreshError::Failed { .. })
    ));
    assert!(!controller.is_refreshing());
    assert_eq!(controller.request_refresh().await, Ok(()));
    assert_eq!(controller.fetch_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_trailing_fetch_sees_failure_of_its_own_round() {
    let calls = Arc::new(AtomicU32::new(0));
    let controller = RefreshController::new({
        let calls = Arc::clone(&calls);
        move || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(FETCH_TIME).await;
                if call == 1 {
                    Err("second fetch failed".to_string())
                } else {
                    Ok(())
                }
            }
        }
    });

    let first = tokio::spawn({
        let controller = controller.clone();
        async move { controller.request_refresh().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let trailing = tokio::spawn({
        let controller = controller.clone();
        async move { controller.request_refresh().await }
    });

    assert_eq!(first.await.unwrap(), Ok(()));
    assert!(matches!(
        trailing.await.unwrap(),
        Err(RefreshError::Failed { .. })
    ));
}
