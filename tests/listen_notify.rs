//! `LISTEN`/`NOTIFY` round-trip against a live server.

use std::env;
use std::time::Duration;

use pgwire_engine::tokio::Conn;
use pgwire_engine::{Error, Opts};

fn test_opts() -> Opts {
    let url = env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/postgres".into());
    Opts::try_from(url.as_str()).expect("invalid DATABASE_URL")
}

#[tokio::test]
async fn notification_is_delivered_to_its_subscriber() {
    let listener = Conn::connect(test_opts()).await.expect("connect listener");
    let notifier = Conn::connect(test_opts()).await.expect("connect notifier");

    let (_id, mut notifications) = listener.listen("pgwire_engine_test_channel").await.expect("listen");

    notifier
        .query("NOTIFY pgwire_engine_test_channel, 'hello'", &[])
        .await
        .expect("notify");

    let notification = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("channel closed");

    assert_eq!(notification.channel, "pgwire_engine_test_channel");
    assert_eq!(notification.payload, "hello");
}

#[tokio::test]
async fn dropping_the_receiver_drains_the_subscription() {
    let listener = Conn::connect(test_opts()).await.expect("connect listener");

    let (id, receiver) = listener.listen("pgwire_engine_drain_test").await.expect("listen");
    drop(receiver);

    // The id is still valid even though its receiver was dropped; unlisten
    // removes it and issues UNLISTEN since it was the channel's last
    // subscriber.
    listener.unlisten(id).await.expect("unlisten");
}

#[tokio::test]
async fn unlisten_of_unknown_handle_is_an_argument_error() {
    let listener = Conn::connect(test_opts()).await.expect("connect listener");
    let (id, _notifications) = listener.listen("pgwire_engine_unknown_handle_test").await.expect("listen");

    listener.unlisten(id).await.expect("first unlisten");
    let err = listener.unlisten(id).await;
    assert!(matches!(err, Err(Error::Argument(_))));
}

#[tokio::test]
async fn notification_arrives_while_idle_between_queries() {
    let listener = Conn::connect(test_opts()).await.expect("connect listener");
    let notifier = Conn::connect(test_opts()).await.expect("connect notifier");

    let (_id, mut notifications) = listener
        .listen("pgwire_engine_idle_notify_test")
        .await
        .expect("listen");

    // No query runs on `listener` between `listen` returning and the NOTIFY
    // arriving: delivery must not depend on the supervisor happening to be
    // mid-query.
    notifier
        .query("NOTIFY pgwire_engine_idle_notify_test, 'idle'", &[])
        .await
        .expect("notify");

    let notification = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("channel closed");
    assert_eq!(notification.payload, "idle");
}
