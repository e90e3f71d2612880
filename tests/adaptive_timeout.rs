//! End-to-end static-vs-adaptive timeout selection between two real
//! services (`spec.md §8` properties 5 and 6; `spec.md §4.3`).

use std::time::Duration;

use clustermsg::config::MessagingConfig;
use clustermsg::error::MessagingError;
use clustermsg::handler::Handler;
use clustermsg::service::MessagingService;

fn config() -> MessagingConfig {
    let mut c = MessagingConfig::new("cluster-a", "127.0.0.1");
    c.interfaces = vec!["127.0.0.1".to_string()];
    c.sweep_interval = Duration::from_millis(5);
    c
}

/// A non-zero timeout is a hard deadline, independent of the adaptive
/// detector: a handler slower than the given timeout fails the call
/// even though the handler would eventually succeed (`spec.md §8`
/// property 5).
#[tokio::test]
async fn a_handler_slower_than_the_static_timeout_fails_the_call() {
    let client = MessagingService::new(config());
    let server = MessagingService::new(config());
    client.start().await.unwrap();
    let addr = server.start().await.unwrap();

    server.register_handler(
        "slow",
        Handler::asynchronous(|payload: Vec<u8>| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(payload)
        }),
        None,
    );

    let result = client
        .send_and_receive(&addr, "slow", vec![], Duration::from_millis(50), None)
        .await;
    assert!(matches!(result, Err(MessagingError::Timeout)));

    client.stop().await;
    server.stop().await;
}

/// A zero timeout selects the adaptive path, which does not fail a
/// call just because no history exists yet for the subject
/// (`spec.md §8` property 6, `spec.md §4.3`: a fresh `RequestMonitor`
/// has an empty sample window, so `is_timed_out` is false until the
/// window fills).
#[tokio::test]
async fn a_fast_reply_on_the_adaptive_path_succeeds_with_no_history() {
    let client = MessagingService::new(config());
    let server = MessagingService::new(config());
    client.start().await.unwrap();
    let addr = server.start().await.unwrap();
    server.register_handler("fast", Handler::sync(|p| p), None);

    let result = client
        .send_and_receive(&addr, "fast", vec![42], Duration::ZERO, None)
        .await
        .unwrap();
    assert_eq!(result, vec![42]);

    client.stop().await;
    server.stop().await;
}

/// A static timeout of zero duration on the loopback path behaves the
/// same as the remote path: adaptive selection, not an instant timeout
/// (`spec.md §4.4`, `§8` property 2 combined with property 6).
#[tokio::test]
async fn loopback_adaptive_path_succeeds_with_no_history() {
    let service = MessagingService::new(config());
    let addr = service.start().await.unwrap();
    service.register_handler("loop", Handler::sync(|p| p), None);

    let result = service
        .send_and_receive(&addr, "loop", vec![1, 2], Duration::ZERO, None)
        .await
        .unwrap();
    assert_eq!(result, vec![1, 2]);
    service.stop().await;
}
