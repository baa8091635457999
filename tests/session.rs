//! End-to-end session tests over an in-memory transport.
//!
//! Each test plays the server side of a scripted conversation: it writes
//! greeting and responses, and asserts the exact command lines the session
//! sends back.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::timeout;

use mailwatch::{
    BodyContent, Error, Filter, ImapStream, SessionConfig, SessionHandle, spawn_with_transport,
};

fn test_config() -> SessionConfig {
    SessionConfig::new("imap.test.invalid", "user", "secret", "itest")
}

async fn send(server: &mut DuplexStream, bytes: &[u8]) {
    server.write_all(bytes).await.expect("server write");
}

/// Reads one CRLF-terminated line from the client and asserts its content.
async fn expect(server: &mut DuplexStream, line: &str) {
    let read = async {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            server.read_exact(&mut byte).await.expect("server read");
            buf.push(byte[0]);
            if buf.ends_with(b"\r\n") {
                break;
            }
        }
        String::from_utf8(buf).expect("command is UTF-8")
    };
    let got = timeout(Duration::from_secs(5), read)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for: {line}"));
    assert_eq!(got, format!("{line}\r\n"));
}

/// Polls a handle operation until the session task has terminated.
async fn wait_for_termination(handle: &SessionHandle) -> Error {
    let poll = async {
        loop {
            match handle.capabilities().await {
                Err(error) => break error,
                Ok(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    };
    timeout(Duration::from_secs(5), poll)
        .await
        .expect("session did not terminate")
}

#[tokio::test]
async fn delivers_decoded_message_to_subscriber() {
    let (client, mut server) = tokio::io::duplex(4096);
    let handle = spawn_with_transport(test_config(), ImapStream::mock(client)).unwrap();

    // Register before any message appears; the reply does not need the wire.
    let filter = Filter::builder().lacks_flag("\\Seen").build().unwrap();
    let mut subscription = handle.subscribe(filter).await.unwrap();

    // Lifecycle: greeting, capabilities, login, post-auth capabilities,
    // select.
    send(&mut server, b"* OK ready.\r\n").await;
    expect(&mut server, "0 CAPABILITY").await;
    send(&mut server, b"* CAPABILITY IMAP4rev1 IDLE\r\n0 OK done\r\n").await;
    expect(&mut server, "1 LOGIN \"user\" \"secret\"").await;
    send(&mut server, b"1 OK logged in\r\n").await;
    expect(&mut server, "2 CAPABILITY").await;
    send(&mut server, b"* CAPABILITY IMAP4rev1 IDLE\r\n2 OK done\r\n").await;
    expect(&mut server, "3 SELECT \"INBOX\"").await;
    send(
        &mut server,
        b"* FLAGS (\\Answered \\Seen \\Deleted)\r\n\
          * 0 EXISTS\r\n\
          * 0 RECENT\r\n\
          * OK [UIDVALIDITY 38675294] UIDs valid\r\n\
          * OK [UIDNEXT 1] next\r\n\
          3 OK [READ-WRITE] selected\r\n",
    )
    .await;

    // Steady: the session idles.
    expect(&mut server, "4 IDLE").await;
    send(&mut server, b"+ idling\r\n").await;

    // A new message arrives; the session cancels the idle and fetches in
    // three stages.
    send(&mut server, b"* 1 EXISTS\r\n").await;
    expect(&mut server, "DONE").await;
    send(&mut server, b"4 OK idle finished\r\n").await;

    expect(&mut server, "5 FETCH 1 (FLAGS)").await;
    send(&mut server, b"* 1 FETCH (FLAGS ())\r\n5 OK fetched\r\n").await;

    expect(&mut server, "6 FETCH 1 (BODY ENVELOPE)").await;
    send(
        &mut server,
        b"* 1 FETCH (BODY (\"TEXT\" \"PLAIN\" (\"CHARSET\" \"US-ASCII\") NIL NIL \"7BIT\" 14 1) \
          ENVELOPE (\"Thu, 15 Jan 2026 19:31:43 +0000\" \"Test message\" \
          ((\"Alice\" NIL \"alice\" \"Example.COM\")) ((\"Alice\" NIL \"alice\" \"Example.COM\")) \
          NIL ((NIL NIL \"bob\" \"example.org\")) NIL NIL NIL \"<m1@example.com>\"))\r\n\
          6 OK fetched\r\n",
    )
    .await;

    expect(&mut server, "7 FETCH 1 (BODY.PEEK[1])").await;
    send(
        &mut server,
        b"* 1 FETCH (BODY[1] {14}\r\nHello 123\r\n456)\r\n7 OK fetched\r\n",
    )
    .await;

    let message = timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("delivery timed out")
        .expect("subscription closed early");

    assert_eq!(message.seqnum, 1);
    assert!(message.flags.is_empty());
    assert_eq!(message.subject.as_deref(), Some("Test message"));
    assert_eq!(
        message.date.unwrap().to_rfc3339(),
        "2026-01-15T19:31:43+00:00"
    );
    assert_eq!(message.from.len(), 1);
    assert_eq!(message.from[0].name.as_deref(), Some("Alice"));
    assert_eq!(message.from[0].email, "alice@example.com");
    assert_eq!(message.to[0].email, "bob@example.org");
    assert_eq!(message.message_id.as_deref(), Some("<m1@example.com>"));
    match &message.body {
        BodyContent::Part {
            mime_type,
            params,
            data,
        } => {
            assert_eq!(mime_type, "text/plain");
            assert_eq!(params.get("charset").map(String::as_str), Some("US-ASCII"));
            assert_eq!(data, b"Hello 123\r\n456");
        }
        other => panic!("expected onepart body, got {other:?}"),
    }

    // With the index drained the session re-enters IDLE.
    expect(&mut server, "8 IDLE").await;
    send(&mut server, b"+ idling\r\n").await;

    // Cooperative shutdown: DONE, then LOGOUT.
    handle.shutdown().await.unwrap();
    expect(&mut server, "DONE").await;
    send(&mut server, b"8 OK idle finished\r\n").await;
    expect(&mut server, "9 LOGOUT").await;
    send(&mut server, b"* BYE bye\r\n9 OK logged out\r\n").await;

    // The subscriber channel closes with the session.
    let end = timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("shutdown timed out");
    assert!(end.is_none());
}

#[tokio::test]
async fn message_rejected_by_every_filter_is_discarded() {
    let (client, mut server) = tokio::io::duplex(4096);
    let handle = spawn_with_transport(test_config(), ImapStream::mock(client)).unwrap();

    // Only flagged messages pass.
    let filter = Filter::builder().has_flag("\\Flagged").build().unwrap();
    let mut subscription = handle.subscribe(filter).await.unwrap();

    send(&mut server, b"* OK ready.\r\n").await;
    expect(&mut server, "0 CAPABILITY").await;
    send(&mut server, b"* CAPABILITY IMAP4rev1 IDLE\r\n0 OK done\r\n").await;
    expect(&mut server, "1 LOGIN \"user\" \"secret\"").await;
    send(&mut server, b"1 OK logged in\r\n").await;
    expect(&mut server, "2 CAPABILITY").await;
    send(&mut server, b"* CAPABILITY IMAP4rev1 IDLE\r\n2 OK done\r\n").await;
    expect(&mut server, "3 SELECT \"INBOX\"").await;
    send(&mut server, b"* 2 EXISTS\r\n3 OK selected\r\n").await;

    expect(&mut server, "4 IDLE").await;
    send(&mut server, b"+ idling\r\n").await;
    send(&mut server, b"* 3 EXISTS\r\n").await;
    expect(&mut server, "DONE").await;
    send(&mut server, b"4 OK idle finished\r\n").await;

    // Stage one: the filter only needs flags. The message is unflagged, so
    // the pipeline discards it without fetching a body and goes back to idle.
    expect(&mut server, "5 FETCH 3 (FLAGS)").await;
    send(&mut server, b"* 3 FETCH (FLAGS (\\Seen))\r\n5 OK fetched\r\n").await;

    expect(&mut server, "6 IDLE").await;
    send(&mut server, b"+ idling\r\n").await;

    // Nothing must have been delivered.
    let nothing = timeout(Duration::from_millis(200), subscription.recv()).await;
    assert!(nothing.is_err(), "unexpected delivery");
}

#[tokio::test]
async fn lifecycle_rejection_terminates_session() {
    let (client, mut server) = tokio::io::duplex(4096);
    let handle = spawn_with_transport(test_config(), ImapStream::mock(client)).unwrap();

    send(&mut server, b"* OK ready.\r\n").await;
    expect(&mut server, "0 CAPABILITY").await;
    send(&mut server, b"0 NO not today\r\n").await;

    let error = wait_for_termination(&handle).await;
    assert!(matches!(error, Error::ConnectionLost(_)));
}

#[tokio::test]
async fn plaintext_without_starttls_is_fatal() {
    let (client, mut server) = tokio::io::duplex(4096);
    let config = test_config().tls(false);
    let handle = spawn_with_transport(config, ImapStream::mock(client)).unwrap();

    send(&mut server, b"* OK ready.\r\n").await;
    expect(&mut server, "0 CAPABILITY").await;
    // No STARTTLS on offer: the session must refuse to log in over plaintext.
    send(&mut server, b"* CAPABILITY IMAP4rev1 IDLE\r\n0 OK done\r\n").await;

    let error = wait_for_termination(&handle).await;
    assert!(matches!(error, Error::ConnectionLost(_)));
}

#[tokio::test(start_paused = true)]
async fn polls_with_noop_when_idle_is_missing() {
    let (client, mut server) = tokio::io::duplex(4096);
    let handle = spawn_with_transport(test_config(), ImapStream::mock(client)).unwrap();

    send(&mut server, b"* OK ready.\r\n").await;
    expect(&mut server, "0 CAPABILITY").await;
    send(&mut server, b"* CAPABILITY IMAP4rev1\r\n0 OK done\r\n").await;
    expect(&mut server, "1 LOGIN \"user\" \"secret\"").await;
    send(&mut server, b"1 OK logged in\r\n").await;
    expect(&mut server, "2 CAPABILITY").await;
    send(&mut server, b"* CAPABILITY IMAP4rev1\r\n2 OK done\r\n").await;
    expect(&mut server, "3 SELECT \"INBOX\"").await;
    send(&mut server, b"* 0 EXISTS\r\n3 OK selected\r\n").await;

    // No IDLE capability: the session falls back to periodic NOOP.
    expect(&mut server, "4 NOOP").await;
    send(&mut server, b"4 OK nothing new\r\n").await;
    expect(&mut server, "5 NOOP").await;
    send(&mut server, b"5 OK nothing new\r\n").await;

    drop(handle);
    expect(&mut server, "6 LOGOUT").await;
    send(&mut server, b"* BYE bye\r\n6 OK logged out\r\n").await;
}

#[tokio::test]
async fn expunge_renumbers_inflight_fetch() {
    let (client, mut server) = tokio::io::duplex(4096);
    let handle = spawn_with_transport(test_config(), ImapStream::mock(client)).unwrap();

    let mut subscription = handle.subscribe(Filter::accept_all()).await.unwrap();

    send(&mut server, b"* OK ready.\r\n").await;
    expect(&mut server, "0 CAPABILITY").await;
    send(&mut server, b"* CAPABILITY IMAP4rev1 IDLE\r\n0 OK done\r\n").await;
    expect(&mut server, "1 LOGIN \"user\" \"secret\"").await;
    send(&mut server, b"1 OK logged in\r\n").await;
    expect(&mut server, "2 CAPABILITY").await;
    send(&mut server, b"* CAPABILITY IMAP4rev1 IDLE\r\n2 OK done\r\n").await;
    expect(&mut server, "3 SELECT \"INBOX\"").await;
    send(&mut server, b"* 4 EXISTS\r\n3 OK selected\r\n").await;

    expect(&mut server, "4 IDLE").await;
    send(&mut server, b"+ idling\r\n").await;
    send(&mut server, b"* 5 EXISTS\r\n").await;
    expect(&mut server, "DONE").await;
    send(&mut server, b"4 OK idle finished\r\n").await;

    // AcceptAll needs no filter attributes: the pipeline goes straight for
    // the body structure of message 5.
    expect(&mut server, "5 FETCH 5 (BODY FLAGS ENVELOPE)").await;

    // Message 2 is expunged while the fetch is in flight: the watched
    // message renumbers from 5 to 4, and so does the in-flight tag.
    send(&mut server, b"* 2 EXPUNGE\r\n").await;
    send(
        &mut server,
        b"* 4 FETCH (BODY (\"TEXT\" \"PLAIN\" NIL NIL NIL \"7BIT\" 2 1) \
          ENVELOPE (NIL \"renumbered\" NIL NIL NIL NIL NIL NIL NIL NIL) FLAGS ())\r\n\
          5 OK fetched\r\n",
    )
    .await;

    expect(&mut server, "6 FETCH 4 (BODY.PEEK[1])").await;
    send(&mut server, b"* 4 FETCH (BODY[1] \"hi\")\r\n6 OK fetched\r\n").await;

    let message = timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("delivery timed out")
        .expect("subscription closed early");
    assert_eq!(message.seqnum, 4);
    assert_eq!(message.subject.as_deref(), Some("renumbered"));
}
