use imap_pool::{search::ListOptions, ErrorCode, IdentityKey, MailSession};
use imap_pool_testing::{MailServer, TestEnv};

fn key() -> IdentityKey {
    IdentityKey::new("alice", "work")
}

#[test_log::test(tokio::test)]
async fn session_keeps_one_connection() {
    let env = TestEnv::new(MailServer::new().with_mailbox("Archive", &[]));

    for id in 1..=3 {
        let raw = format!("Message-ID: <{id}@localhost>\r\nSubject: {id}\r\n\r\nHello\r\n");
        env.server.add_message("INBOX", &raw, &[]);
    }

    let mut session = MailSession::new(env.password_client("alice", "work"));
    assert!(session.client().preserves_connection());
    assert!(!session.is_initialized());

    session.initialize().await.unwrap();
    session.initialize().await.unwrap();
    assert!(session.is_initialized());

    let envelopes = session
        .get_messages("INBOX", &ListOptions::default())
        .await
        .unwrap();

    for envelope in &envelopes {
        session.mark_as_read("INBOX", envelope.uid).await.unwrap();
    }

    session.move_message("INBOX", "Archive", 1, None).await.unwrap();

    assert_eq!(env.server.connects(), 1);
    assert_eq!(env.pool.stats(&key()).in_use, 1);

    let names: Vec<_> = session.metrics().iter().map(|m| m.name).collect();
    assert_eq!(
        names,
        ["get_messages", "mark_as_read", "mark_as_read", "mark_as_read", "move_message"]
    );

    let summary = session.close();

    assert!(session.is_closed());
    assert_eq!(summary.operations, 5);
    assert!(summary.slowest.is_some());
    assert_eq!(env.pool.stats(&key()).idle, 1);
    assert_eq!(env.server.count("Archive"), 1);
}

#[test_log::test(tokio::test)]
async fn session_initializes_lazily() {
    let env = TestEnv::new(MailServer::new());
    let mut session = MailSession::new(env.password_client("alice", "work"));

    session.test_connection().await.unwrap();

    assert!(session.is_initialized());
    assert_eq!(session.metrics().len(), 1);
}

#[test_log::test(tokio::test)]
async fn failed_operations_are_recorded() {
    let env = TestEnv::new(MailServer::new());
    let mut session = MailSession::new(env.password_client("alice", "work"));

    let err = session.get_message("INBOX", 42).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::MessageNotFound);

    // the connection survives the failure
    assert_eq!(env.pool.stats(&key()).in_use, 1);
    assert_eq!(session.metrics()[0].name, "get_message");
}

#[test_log::test(tokio::test)]
async fn closed_session() {
    let env = TestEnv::new(MailServer::new());
    let mut session = MailSession::new(env.password_client("alice", "work"));

    session.get_folders().await.unwrap();

    let summary = session.close();
    assert_eq!(session.close(), summary);
    assert_eq!(env.pool.stats(&key()).idle, 1);

    let err = session.get_folders().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::SessionClosed);
    assert_eq!(session.metrics().len(), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn session_fails_when_server_unreachable() {
    let env = TestEnv::new(MailServer::new());
    env.server.fail_connects(usize::MAX);

    let mut session = MailSession::new(env.password_client("alice", "work"));
    let attempts = env.pool.config().retry_attempts as usize;

    let err = session.initialize().await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::ConnectionFailed);
    assert!(!session.is_initialized());
    assert_eq!(env.server.connects(), attempts);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn failed_implicit_initialization_is_recorded() {
    let env = TestEnv::new(MailServer::new());
    env.server.fail_connects(usize::MAX);

    let mut session = MailSession::new(env.password_client("alice", "work"));

    let err = session.get_folders().await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::ConnectionFailed);
    assert!(!session.is_initialized());
    assert_eq!(session.metrics().len(), 1);
    assert_eq!(session.metrics()[0].name, "get_folders");
}
