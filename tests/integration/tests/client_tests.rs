//! End-to-end tests for the dial-out client against a sockline server.

use anyhow::Result;
use integration_tests::{TestServer, WAIT};
use sockline::{Client, Error, Manager};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[tokio::test]
async fn test_client_echo() -> Result<()> {
    let manager = Manager::new();
    manager.handle_message(|session, msg| {
        let _ = session.write(msg);
    });
    let server = TestServer::start(manager).await?;

    let client = Client::new();

    let (connected_tx, mut connected_rx) = mpsc::unbounded_channel();
    client.handle_connect(move || {
        let _ = connected_tx.send(());
    });

    let (messages_tx, mut messages_rx) = mpsc::unbounded_channel();
    client.handle_message(move |msg| {
        let _ = messages_tx.send(msg.to_string());
    });

    let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
    client.handle_sent(move |msg| {
        let _ = sent_tx.send(msg.to_string());
    });

    let url = server.url();
    let runner = tokio::spawn({
        let client = client.clone();
        async move { client.connect(&url).await }
    });

    timeout(WAIT, connected_rx.recv())
        .await
        .expect("connect callback never fired")
        .unwrap();

    client.send("ping")?;

    let sent = timeout(WAIT, sent_rx.recv())
        .await
        .expect("sent callback never fired")
        .unwrap();
    assert_eq!(sent, "ping");

    let echoed = timeout(WAIT, messages_rx.recv())
        .await
        .expect("no echo received")
        .unwrap();
    assert_eq!(echoed, "ping");

    client.close()?;
    timeout(WAIT, runner)
        .await
        .expect("connection never terminated")?
        .unwrap();
    assert!(client.is_closed());
    Ok(())
}

#[tokio::test]
async fn test_client_observes_server_close() -> Result<()> {
    let manager = Manager::new();
    manager.handle_connect(|session| {
        let _ = session.close_with_reason(1001, "bye");
    });
    let server = TestServer::start(manager).await?;

    let client = Client::new();

    let (closes_tx, mut closes_rx) = mpsc::unbounded_channel();
    client.handle_close(move |code, reason| {
        let _ = closes_tx.send((code, reason.to_string()));
    });

    let (disconnected_tx, mut disconnected_rx) = mpsc::unbounded_channel();
    client.handle_disconnect(move || {
        let _ = disconnected_tx.send(());
    });

    let url = server.url();
    let runner = tokio::spawn({
        let client = client.clone();
        async move { client.connect(&url).await }
    });

    let (code, reason) = timeout(WAIT, closes_rx.recv())
        .await
        .expect("close callback never fired")
        .unwrap();
    assert_eq!(code, 1001);
    assert_eq!(reason, "bye");

    timeout(WAIT, disconnected_rx.recv())
        .await
        .expect("disconnect callback never fired")
        .unwrap();
    timeout(WAIT, runner)
        .await
        .expect("connection never terminated")?
        .unwrap();
    Ok(())
}

#[tokio::test]
async fn test_concurrent_connect_rejected() -> Result<()> {
    let manager = Manager::new();
    let server = TestServer::start(manager).await?;

    let client = Client::new();

    let (connected_tx, mut connected_rx) = mpsc::unbounded_channel();
    client.handle_connect(move || {
        let _ = connected_tx.send(());
    });

    let url = server.url();
    let runner = tokio::spawn({
        let client = client.clone();
        let url = url.clone();
        async move { client.connect(&url).await }
    });

    timeout(WAIT, connected_rx.recv())
        .await
        .expect("connect callback never fired")
        .unwrap();

    // The first connection is still running; a second dial fails fast
    // instead of orphaning it.
    assert!(matches!(
        client.connect(&url).await,
        Err(Error::AlreadyConnected)
    ));

    client.close()?;
    timeout(WAIT, runner)
        .await
        .expect("connection never terminated")?
        .unwrap();
    Ok(())
}

#[tokio::test]
async fn test_client_dial_failure_reported() -> Result<()> {
    let client = Client::new();

    let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();
    client.handle_error(move |err| {
        let _ = errors_tx.send(err.to_string());
    });

    // Nothing listens on port 1.
    assert!(client.connect("ws://127.0.0.1:1/ws").await.is_err());

    let reported = timeout(WAIT, errors_rx.recv())
        .await
        .expect("error callback never fired")
        .unwrap();
    assert!(reported.contains("transport error"));
    Ok(())
}
