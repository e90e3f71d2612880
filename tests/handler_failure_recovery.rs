//! A handler failure over a real connection must surface as
//! `RemoteHandlerFailure` without poisoning the channel it arrived on
//! (`spec.md §8` property 4).

use std::time::Duration;

use clustermsg::config::MessagingConfig;
use clustermsg::error::MessagingError;
use clustermsg::handler::Handler;
use clustermsg::service::MessagingService;

fn config() -> MessagingConfig {
    let mut c = MessagingConfig::new("cluster-a", "127.0.0.1");
    c.interfaces = vec!["127.0.0.1".to_string()];
    c.sweep_interval = Duration::from_millis(10);
    c
}

/// A handler returning `Err` fails the call with `RemoteHandlerFailure`;
/// a second, successful call to the same peer on the same pooled
/// connection still goes through (`spec.md §8` property 4, `spec.md §7`:
/// "Handler exceptions surface as ERROR_HANDLER_EXCEPTION on the reply,
/// not as connection faults").
#[tokio::test]
async fn handler_failure_does_not_prevent_a_later_success_on_the_same_connection() {
    let client = MessagingService::new(config());
    let server = MessagingService::new(config());
    client.start().await.unwrap();
    let addr = server.start().await.unwrap();

    server.register_handler(
        "flaky",
        Handler::fallible(|_payload| Err("handler refused this one".to_string())),
        None,
    );

    let first = client
        .send_and_receive(&addr, "flaky", vec![1], Duration::from_secs(2), None)
        .await;
    assert!(matches!(first, Err(MessagingError::RemoteHandlerFailure(_))));

    server.register_handler("flaky", Handler::sync(|p| p), None);
    let second = client
        .send_and_receive(&addr, "flaky", vec![2], Duration::from_secs(2), None)
        .await
        .unwrap();
    assert_eq!(second, vec![2]);

    client.stop().await;
    server.stop().await;
}
