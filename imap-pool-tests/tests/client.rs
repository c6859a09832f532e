use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use concat_with::concat_line;
use imap_pool::{
    client::WatchEvent,
    flag::Flag,
    folder::FolderKind,
    pool::PoolStats,
    search::{ListOptions, SearchCriteria, SortKey},
    ErrorCode, IdentityKey, PoolConfig,
};
use imap_pool_testing::{MailServer, TestEnv};
use tokio::time::sleep;

fn message(id: u32, subject: &str) -> String {
    format!(
        "Message-ID: <{id}@localhost>\r\n\
         From: alice@localhost\r\n\
         To: bob@localhost\r\n\
         Subject: {subject}\r\n\
         \r\n\
         Hello {id}!\r\n"
    )
}

fn dated_message(id: u32, date: &str) -> String {
    format!(
        "Message-ID: <{id}@localhost>\r\n\
         From: alice@localhost\r\n\
         Subject: message {id}\r\n\
         Date: {date}\r\n\
         \r\n\
         Hello {id}!\r\n"
    )
}

fn key() -> IdentityKey {
    IdentityKey::new("alice", "work")
}

#[test_log::test(tokio::test)]
async fn list_folders() {
    let server = MailServer::new()
        .with_mailbox("Archive", &[])
        .with_mailbox("Archive/2024", &[])
        .with_mailbox("Drafts", &["\\Drafts"])
        .with_mailbox("[Gmail]", &["\\Noselect"])
        .with_mailbox("[Gmail]/Sent", &["\\Sent"]);

    server.add_message("INBOX", &message(1, "first"), &[Flag::Seen]);
    server.add_message("INBOX", &message(2, "second"), &[]);
    server.fail_select("Archive");

    let env = TestEnv::new(server);
    let mut client = env.password_client("alice", "work");

    let folders = client.get_folders().await.unwrap();

    let paths: Vec<_> = folders.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(
        paths,
        ["Archive", "Archive/2024", "Drafts", "INBOX", "[Gmail]", "[Gmail]/Sent"]
    );

    let inbox = &folders[3];
    assert_eq!(inbox.kind, Some(FolderKind::Inbox));
    assert_eq!(inbox.total, Some(2));
    assert_eq!(inbox.unseen, Some(1));

    // unselectable folders are listed without counts
    assert_eq!(folders[0].total, None);
    assert!(!folders[4].is_selectable());
    assert_eq!(folders[4].total, None);

    assert_eq!(folders[1].name, "2024");
    assert_eq!(folders[2].kind, Some(FolderKind::Drafts));
    assert_eq!(folders[5].kind, Some(FolderKind::Sent));

    // the connection is back in the pool
    assert_eq!(env.pool.stats(&key()).idle, 1);
    assert!(!client.has_connection());
}

#[test_log::test(tokio::test)]
async fn count_and_create_folders() {
    let env = TestEnv::new(MailServer::new());
    let mut client = env.password_client("alice", "work");

    env.server.add_message("INBOX", &message(1, "first"), &[]);
    assert_eq!(client.get_folder_message_count("INBOX").await.unwrap(), 1);

    client.create_folder("Projects").await.unwrap();
    assert!(env.server.has_mailbox("Projects"));
    assert_eq!(client.get_folder_message_count("Projects").await.unwrap(), 0);

    let err = client.get_folder_message_count("Unknown").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ProtocolError);

    // every operation reused the same connection
    assert_eq!(env.server.connects(), 1);
}

#[test_log::test(tokio::test)]
async fn find_draft_folder() {
    let server = MailServer::new()
        .with_mailbox("Brouillons", &["\\Drafts"])
        .with_mailbox("Sent", &["\\Sent"]);
    let env = TestEnv::new(server);
    let mut client = env.password_client("alice", "work");

    let draft = client.find_draft_folder().await.unwrap();
    assert_eq!(draft.path, "Brouillons");

    let env = TestEnv::new(MailServer::new().with_mailbox("Sent", &["\\Sent"]));
    let mut client = env.password_client("alice", "work");

    let err = client.find_draft_folder().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::DraftFolderNotFound);
}

#[test_log::test(tokio::test)]
async fn paginate_messages() {
    let env = TestEnv::new(MailServer::new());
    let mut client = env.password_client("alice", "work");

    for id in 1..=5 {
        env.server.add_message("INBOX", &message(id, "hello"), &[]);
    }

    let uids = |envelopes: Vec<imap_pool::message::Envelope>| {
        envelopes.iter().map(|e| e.uid).collect::<Vec<_>>()
    };

    let page = client
        .get_messages("INBOX", &ListOptions::default().with_limit(2))
        .await
        .unwrap();
    assert_eq!(uids(page), [5, 4]);

    let page = client
        .get_messages("INBOX", &ListOptions::default().with_offset(2).with_limit(2))
        .await
        .unwrap();
    assert_eq!(uids(page), [3, 2]);

    let page = client
        .get_messages("INBOX", &ListOptions::default().with_descending(false))
        .await
        .unwrap();
    assert_eq!(uids(page), [1, 2, 3, 4, 5]);
}

#[test_log::test(tokio::test)]
async fn sort_messages_by_date() {
    let env = TestEnv::new(MailServer::new());
    let mut client = env.password_client("alice", "work");

    env.server.add_message("INBOX", &dated_message(1, "Wed, 3 Jan 2024 12:00:00 +0000"), &[]);
    env.server.add_message("INBOX", &dated_message(2, "Mon, 1 Jan 2024 12:00:00 +0000"), &[]);
    env.server.add_message("INBOX", &dated_message(3, "Tue, 2 Jan 2024 12:00:00 +0000"), &[]);

    let opts = ListOptions::default().with_sort(SortKey::Date);
    let envelopes = client.get_messages("INBOX", &opts).await.unwrap();
    let uids: Vec<_> = envelopes.iter().map(|e| e.uid).collect();
    assert_eq!(uids, [1, 3, 2]);

    let opts = opts.with_descending(false);
    let envelopes = client.get_messages("INBOX", &opts).await.unwrap();
    let uids: Vec<_> = envelopes.iter().map(|e| e.uid).collect();
    assert_eq!(uids, [2, 3, 1]);
}

#[test_log::test(tokio::test)]
async fn skip_messages_that_cannot_be_fetched() {
    let env = TestEnv::new(MailServer::new());
    let mut client = env.password_client("alice", "work");

    for id in 1..=5 {
        env.server.add_message("INBOX", &message(id, "hello"), &[]);
    }

    env.server.fail_fetch(3);

    let envelopes = client
        .get_messages("INBOX", &ListOptions::default())
        .await
        .unwrap();
    let uids: Vec<_> = envelopes.iter().map(|e| e.uid).collect();
    assert_eq!(uids, [5, 4, 2, 1]);

    let raws = client.get_messages_raw("INBOX", &[1, 3, 5, 9]).await.unwrap();
    let uids: Vec<_> = raws.iter().map(|m| m.uid).collect();
    assert_eq!(uids, [1, 5]);
}

#[test_log::test(tokio::test)]
async fn search_messages() {
    let env = TestEnv::new(MailServer::new());
    let mut client = env.password_client("alice", "work");

    env.server.add_message("INBOX", &message(1, "Invoice January"), &[Flag::Seen]);
    env.server.add_message("INBOX", &message(2, "Lunch?"), &[]);
    env.server.add_message("INBOX", &message(3, "invoice february"), &[]);

    let criteria = SearchCriteria {
        subject: Some("invoice".into()),
        ..Default::default()
    };
    let envelopes = client
        .search_messages("INBOX", &criteria, &ListOptions::default())
        .await
        .unwrap();
    let uids: Vec<_> = envelopes.iter().map(|e| e.uid).collect();
    assert_eq!(uids, [3, 1]);

    let criteria = SearchCriteria {
        subject: Some("invoice".into()),
        seen: Some(false),
        ..Default::default()
    };
    let envelopes = client
        .search_messages("INBOX", &criteria, &ListOptions::default())
        .await
        .unwrap();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].subject.as_deref(), Some("invoice february"));
    assert!(!envelopes[0].seen);
}

#[test_log::test(tokio::test)]
async fn get_message() {
    let env = TestEnv::new(MailServer::new());
    let mut client = env.password_client("alice", "work");

    let raw = concat_line!(
        "Message-ID: <hello@localhost>",
        "From: Alice <alice@localhost>",
        "To: bob@localhost",
        "Subject: Hello",
        "Content-Type: text/plain; charset=utf-8",
        "",
        "Hello, world!",
        "",
    );

    let uid = env.server.add_message("INBOX", raw, &[Flag::Seen]);

    let msg = client.get_message("INBOX", uid).await.unwrap();
    assert_eq!(msg.envelope.uid, uid);
    assert_eq!(msg.envelope.message_id.as_deref(), Some("hello@localhost"));
    assert_eq!(msg.envelope.subject.as_deref(), Some("Hello"));
    assert_eq!(msg.envelope.from[0].name.as_deref(), Some("Alice"));
    assert_eq!(msg.envelope.from[0].addr, "alice@localhost");
    assert!(msg.envelope.seen);
    assert_eq!(msg.text.as_deref().map(str::trim), Some("Hello, world!"));
    assert!(msg.attachments.is_empty());

    let raw_msg = client.get_message_raw("INBOX", uid).await.unwrap();
    assert_eq!(raw_msg.source, raw.as_bytes());
    assert_eq!(raw_msg.flags, [Flag::Seen]);

    let err = client.get_message("INBOX", 42).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::MessageNotFound);

    let empty = env.server.add_message("INBOX", "", &[]);
    let err = client.get_message("INBOX", empty).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::BodyNotFound);
    let err = client.get_message_raw("INBOX", empty).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::BodyNotFound);
}

#[test_log::test(tokio::test)]
async fn find_message_by_message_id() {
    let env = TestEnv::new(MailServer::new());
    let mut client = env.password_client("alice", "work");

    env.server.add_message("INBOX", &message(7, "first copy"), &[]);
    env.server.add_message("INBOX", &message(8, "other"), &[]);
    let latest = env.server.add_message("INBOX", &message(7, "second copy"), &[]);

    let envelope = client
        .find_message_by_message_id("INBOX", "7@localhost")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.uid, latest);
    assert_eq!(envelope.subject.as_deref(), Some("second copy"));

    let envelope = client
        .find_message_by_message_id("INBOX", "unknown@localhost")
        .await
        .unwrap();
    assert_eq!(envelope, None);
}

#[test_log::test(tokio::test)]
async fn mark_and_delete_messages() {
    let env = TestEnv::new(MailServer::new());
    let mut client = env.password_client("alice", "work");

    let uid = env.server.add_message("INBOX", &message(1, "hello"), &[]);
    env.server.add_message("INBOX", &message(2, "world"), &[]);

    client.mark_as_read("INBOX", uid).await.unwrap();
    assert_eq!(env.server.flags("INBOX", uid).unwrap(), [Flag::Seen]);

    client.mark_as_unread("INBOX", uid).await.unwrap();
    assert!(env.server.flags("INBOX", uid).unwrap().is_empty());

    client.delete_message("INBOX", uid).await.unwrap();
    assert_eq!(env.server.uids("INBOX"), [2]);
}

#[test_log::test(tokio::test)]
async fn move_message() {
    let server = MailServer::new().with_mailbox("Archive", &[]);
    let env = TestEnv::new(server);
    let mut client = env.password_client("alice", "work");

    let uid = env.server.add_message("INBOX", &message(1, "hello"), &[]);

    client
        .move_message("INBOX", "Archive", uid, Some(&[Flag::Seen]))
        .await
        .unwrap();

    assert_eq!(env.server.count("INBOX"), 0);
    assert_eq!(env.server.search_message_id("Archive", "1@localhost"), [1]);
    assert_eq!(env.server.flags("Archive", 1).unwrap(), [Flag::Seen]);
}

#[test_log::test(tokio::test)]
async fn move_message_without_move_capability() {
    let server = MailServer::new().with_mailbox("Archive", &[]).without_move();
    let env = TestEnv::new(server);
    let mut client = env.password_client("alice", "work");

    let uid = env.server.add_message("INBOX", &message(1, "hello"), &[]);
    let other = env.server.add_message("INBOX", &message(2, "world"), &[]);

    client.move_message("INBOX", "Archive", uid, None).await.unwrap();

    assert_eq!(env.server.uids("INBOX"), [other]);
    assert_eq!(env.server.count("Archive"), 1);
    assert!(env.server.flags("Archive", 1).unwrap().is_empty());
}

#[test_log::test(tokio::test)]
async fn move_message_removes_leftovers() {
    let server = MailServer::new().with_mailbox("Archive", &[]).with_lazy_move();
    let env = TestEnv::new(server);
    let mut client = env.password_client("alice", "work");

    let uid = env.server.add_message("INBOX", &message(1, "hello"), &[]);
    env.server.add_message("INBOX", &message(2, "world"), &[]);

    client.move_message("INBOX", "Archive", uid, None).await.unwrap();

    assert!(env.server.search_message_id("INBOX", "1@localhost").is_empty());
    assert_eq!(env.server.count("INBOX"), 1);
    assert_eq!(env.server.count("Archive"), 1);
}

#[test_log::test(tokio::test)]
async fn move_message_keeps_duplicates() {
    let server = MailServer::new().with_mailbox("Archive", &[]).with_lazy_move();
    let env = TestEnv::new(server);
    let mut client = env.password_client("alice", "work");

    let duplicate = env.server.add_message("INBOX", &message(1, "hello"), &[]);
    let uid = env.server.add_message("INBOX", &message(1, "hello"), &[]);

    client.move_message("INBOX", "Archive", uid, None).await.unwrap();

    assert_eq!(env.server.uids("INBOX"), [duplicate]);
    assert_eq!(env.server.count("Archive"), 1);
}

#[test_log::test(tokio::test)]
async fn move_message_into_source_folder() {
    for server in [MailServer::new(), MailServer::new().without_move()] {
        let env = TestEnv::new(server);
        let mut client = env.password_client("alice", "work");

        let uid = env.server.add_message("INBOX", &message(1, "hello"), &[]);

        client.move_message("INBOX", "INBOX", uid, None).await.unwrap();

        assert_eq!(env.server.count("INBOX"), 1);
        assert_eq!(env.server.search_message_id("INBOX", "1@localhost").len(), 1);
    }
}

#[test_log::test(tokio::test)]
async fn move_message_errors() {
    let server = MailServer::new().with_mailbox("Archive", &[]);
    let env = TestEnv::new(server);
    let mut client = env.password_client("alice", "work");

    let err = client
        .move_message("INBOX", "Archive", 42, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::MessageNotFound);

    let uid = env.server.add_message("INBOX", &message(1, "hello"), &[]);

    let err = client
        .move_message("INBOX", "Unknown", uid, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::MoveFailed);
    assert_eq!(env.server.uids("INBOX"), [uid]);
}

#[test_log::test(tokio::test)]
async fn append_message() {
    let env = TestEnv::new(MailServer::new().with_mailbox("Drafts", &["\\Drafts"]));
    let mut client = env.password_client("alice", "work");

    let draft = concat_line!("From: alice@localhost", "Subject: draft", "", "Hello");

    let uid = client
        .append_message("Drafts", draft, None)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        env.server.source("Drafts", uid).unwrap(),
        b"From: alice@localhost\r\nSubject: draft\r\n\r\nHello"
    );
    assert_eq!(env.server.flags("Drafts", uid).unwrap(), [Flag::Draft]);

    let uid = client
        .append_message("INBOX", "Subject: sent\r\n\r\nHi", Some(&[Flag::Seen]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(env.server.flags("INBOX", uid).unwrap(), [Flag::Seen]);

    let err = client
        .append_message("Unknown", draft, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AppendFailed);
}

#[test_log::test(tokio::test)]
async fn preserve_connection() {
    let env = TestEnv::new(MailServer::new());
    let mut client = env.password_client("alice", "work").with_preserve_connection(true);

    client.test_connection().await.unwrap();
    client.get_folders().await.unwrap();

    assert!(client.has_connection());
    assert_eq!(env.pool.stats(&key()).in_use, 1);

    client.release();

    assert!(!client.has_connection());
    assert_eq!(env.pool.stats(&key()).idle, 1);
    assert_eq!(env.server.connects(), 1);
}

#[test_log::test(tokio::test)]
async fn drop_releases_connection() {
    let env = TestEnv::new(MailServer::new());

    {
        let mut client = env.password_client("alice", "work").with_preserve_connection(true);
        client.connect().await.unwrap();
        assert_eq!(env.pool.stats(&key()).in_use, 1);
    }

    assert_eq!(env.pool.stats(&key()).idle, 1);
}

#[test_log::test(tokio::test)]
async fn reconnect_after_server_close() {
    let env = TestEnv::new(MailServer::new());
    let mut client = env.password_client("alice", "work").with_preserve_connection(true);

    client.test_connection().await.unwrap();
    env.server.close_connections();
    client.test_connection().await.unwrap();

    assert_eq!(env.server.connects(), 2);
    assert_eq!(env.server.open_connections(), 1);
    assert_eq!(env.pool.stats(&key()).total, 1);
}

#[test_log::test(tokio::test)]
async fn watch_folder() {
    let env = TestEnv::new(MailServer::new());
    let mut client = env.password_client("alice", "work");

    env.server.add_message("INBOX", &message(1, "hello"), &[]);

    let events = Arc::new(Mutex::new(Vec::new()));

    client
        .start_idle_monitoring("INBOX", {
            let events = events.clone();
            move |event| events.lock().unwrap().push(event)
        })
        .await
        .unwrap();

    assert!(client.is_watching());
    assert_eq!(env.pool.stats(&key()).in_use, 1);

    env.server.deliver("INBOX", &message(2, "world"));

    assert_eq!(
        *events.lock().unwrap(),
        [WatchEvent::NewMessages {
            folder: "INBOX".into(),
            count: 2,
        }]
    );

    client.stop_idle_monitoring().await.unwrap();
    client.stop_idle_monitoring().await.unwrap();
    assert!(!client.is_watching());

    env.server.deliver("INBOX", &message(3, "again"));
    assert_eq!(events.lock().unwrap().len(), 1);

    // stopping does not give the connection back
    assert_eq!(env.pool.stats(&key()).in_use, 1);

    client.release();
    assert_eq!(env.pool.stats(&key()).idle, 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn drop_while_watching_discards_connection() {
    let config = PoolConfig::default()
        .with_max_connections(1)
        .with_connection_timeout(Duration::from_millis(200));
    let env = TestEnv::with_config(MailServer::new(), config);

    {
        let mut client = env.password_client("alice", "work");
        client.start_idle_monitoring("INBOX", |_| ()).await.unwrap();
        assert_eq!(env.pool.stats(&key()).in_use, 1);
    }

    assert_eq!(env.pool.stats(&key()), PoolStats::default());

    sleep(Duration::from_millis(10)).await;
    assert_eq!(env.server.open_connections(), 0);

    // the capacity of the identity is available again
    let mut client = env.password_client("alice", "work");
    client.test_connection().await.unwrap();
    assert_eq!(env.server.connects(), 2);
}

#[test_log::test(tokio::test)]
async fn watch_unknown_folder() {
    let env = TestEnv::new(MailServer::new());
    let mut client = env.password_client("alice", "work");

    let err = client
        .start_idle_monitoring("Unknown", |_| ())
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::ProtocolError);
    assert!(!client.is_watching());
    assert_eq!(env.pool.stats(&key()).idle, 1);
}
