//! In-memory mail server, connector and connection.

use std::{
    collections::{BTreeMap, HashSet},
    io,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use imap_pool::{
    connection::{
        Connection, ConnectionAuth, ConnectionError, ConnectionEvent, ConnectionListener,
        ConnectionParams, ConnectionResult, Connector, FetchQuery, FetchedMessage, MailboxEntry,
        MailboxStatus, SearchKey, SearchQuery, SubscriptionId, MOVE_CAPABILITY,
    },
    flag::Flag,
};
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Debug)]
struct StoredMessage {
    flags: Vec<Flag>,
    source: Vec<u8>,
    internal_date: DateTime<Utc>,
}

impl StoredMessage {
    fn has_flag(&self, flag: &Flag) -> bool {
        self.flags.contains(flag)
    }

    fn header_section(&self) -> &[u8] {
        let end = self
            .source
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|pos| pos + 4)
            .unwrap_or(self.source.len());

        &self.source[..end]
    }

    fn header(&self, name: &str) -> Option<String> {
        let headers = String::from_utf8_lossy(self.header_section()).into_owned();

        headers.lines().find_map(|line| {
            let (key, val) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| val.trim().to_owned())
        })
    }

    fn header_contains(&self, name: &str, needle: &str) -> bool {
        self.header(name)
            .map(|val| val.to_lowercase().contains(&needle.to_lowercase()))
            .unwrap_or_default()
    }

    fn matches(&self, key: &SearchKey) -> bool {
        match key {
            SearchKey::All => true,
            SearchKey::Seen => self.has_flag(&Flag::Seen),
            SearchKey::Unseen => !self.has_flag(&Flag::Seen),
            SearchKey::Flagged => self.has_flag(&Flag::Flagged),
            SearchKey::Unflagged => !self.has_flag(&Flag::Flagged),
            SearchKey::From(val) => self.header_contains("From", val),
            SearchKey::To(val) => self.header_contains("To", val),
            SearchKey::Subject(val) => self.header_contains("Subject", val),
            SearchKey::Header(name, val) => self.header_contains(name, val),
            SearchKey::Body(val) => String::from_utf8_lossy(&self.source)
                .to_lowercase()
                .contains(&val.to_lowercase()),
            SearchKey::Before(date) => self.internal_date.date_naive() < *date,
            SearchKey::Since(date) => self.internal_date.date_naive() >= *date,
            SearchKey::Larger(size) => self.source.len() as u64 > *size,
            SearchKey::Smaller(size) => (self.source.len() as u64) < *size,
        }
    }
}

const SPECIAL_USES: [&str; 6] = ["\\Sent", "\\Drafts", "\\Trash", "\\Junk", "\\Archive", "\\All"];

#[derive(Clone, Debug, Default)]
struct Mailbox {
    attributes: Vec<String>,
    special_use: Option<String>,
    messages: BTreeMap<u32, StoredMessage>,
    uid_next: u32,
}

impl Mailbox {
    fn new(attributes: &[&str]) -> Self {
        let special_use = attributes
            .iter()
            .find(|attr| SPECIAL_USES.contains(*attr))
            .map(|attr| attr.to_string());

        Self {
            attributes: attributes.iter().map(ToString::to_string).collect(),
            special_use,
            messages: BTreeMap::new(),
            uid_next: 1,
        }
    }

    fn append(&mut self, message: StoredMessage) -> u32 {
        let uid = self.uid_next;
        self.uid_next += 1;
        self.messages.insert(uid, message);
        uid
    }

    fn status(&self) -> MailboxStatus {
        MailboxStatus {
            exists: self.messages.len() as u32,
            unseen: Some(
                self.messages
                    .values()
                    .filter(|msg| !msg.has_flag(&Flag::Seen))
                    .count() as u32,
            ),
            uid_next: Some(self.uid_next),
        }
    }
}

#[derive(Default)]
struct ServerState {
    mailboxes: BTreeMap<String, Mailbox>,
    capabilities: HashSet<String>,
    failing_connects: usize,
    failing_fetches: HashSet<u32>,
    failing_selects: HashSet<String>,
    move_leaves_source: bool,
    connects: usize,
    logins: Vec<ConnectionAuth>,
    connections: Vec<Weak<MemoryConnection>>,
}

/// The in-memory mail server.
///
/// This is a cheap handle: clones share the same mailboxes. Mailbox
/// paths use `/` as delimiter. The server starts with an empty
/// `INBOX` and advertises `MOVE`.
#[derive(Clone)]
pub struct MailServer {
    state: Arc<Mutex<ServerState>>,
}

impl Default for MailServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MailServer {
    pub fn new() -> Self {
        let mut state = ServerState::default();
        state.mailboxes.insert("INBOX".into(), Mailbox::new(&[]));
        state.capabilities.insert(MOVE_CAPABILITY.into());

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        lock(&self.state)
    }

    /// Build a connector establishing connections to this server.
    pub fn connector(&self) -> Arc<MemoryConnector> {
        Arc::new(MemoryConnector {
            server: self.clone(),
        })
    }

    /// Create a mailbox with the given name attributes.
    pub fn with_mailbox(self, path: &str, attributes: &[&str]) -> Self {
        self.state()
            .mailboxes
            .insert(path.to_owned(), Mailbox::new(attributes));
        self
    }

    /// Stop advertising the `MOVE` capability.
    pub fn without_move(self) -> Self {
        self.state().capabilities.remove(MOVE_CAPABILITY);
        self
    }

    /// Make the `MOVE` command copy the message without removing it
    /// from the source mailbox.
    pub fn with_lazy_move(self) -> Self {
        self.state().move_leaves_source = true;
        self
    }

    /// Make the next `count` connects fail. Use `usize::MAX` to make
    /// all of them fail.
    pub fn fail_connects(&self, count: usize) {
        self.state().failing_connects = count;
    }

    /// Make every fetch of the given UID fail.
    pub fn fail_fetch(&self, uid: u32) {
        self.state().failing_fetches.insert(uid);
    }

    /// Make every selection of the given mailbox fail.
    pub fn fail_select(&self, path: &str) {
        self.state().failing_selects.insert(path.to_owned());
    }

    /// Store a message without notifying anyone. Return its UID.
    pub fn add_message(&self, path: &str, raw: &str, flags: &[Flag]) -> u32 {
        self.state()
            .mailboxes
            .entry(path.to_owned())
            .or_insert_with(|| Mailbox::new(&[]))
            .append(StoredMessage {
                flags: flags.to_vec(),
                source: raw.as_bytes().to_vec(),
                internal_date: Utc::now(),
            })
    }

    /// Store a message, then notify connections watching the mailbox.
    pub fn deliver(&self, path: &str, raw: &str) -> u32 {
        let uid = self.add_message(path, raw, &[]);
        let count = self.count(path);

        for conn in self.live_connections() {
            if conn.is_idling() && conn.selected().as_deref() == Some(path) {
                conn.emit(&ConnectionEvent::Exists {
                    folder: path.to_owned(),
                    count: count as u32,
                });
            }
        }

        uid
    }

    /// Close every open connection, as a server restart would.
    pub fn close_connections(&self) {
        for conn in self.live_connections() {
            conn.close();
        }
    }

    /// Return the number of connect attempts, failed ones included.
    pub fn connects(&self) -> usize {
        self.state().connects
    }

    /// Return the authentication material of every successful
    /// connect.
    pub fn logins(&self) -> Vec<ConnectionAuth> {
        self.state().logins.clone()
    }

    /// Return the number of open connections.
    pub fn open_connections(&self) -> usize {
        self.live_connections()
            .iter()
            .filter(|conn| conn.is_usable())
            .count()
    }

    pub fn count(&self, path: &str) -> usize {
        self.state()
            .mailboxes
            .get(path)
            .map(|mbox| mbox.messages.len())
            .unwrap_or_default()
    }

    pub fn uids(&self, path: &str) -> Vec<u32> {
        self.state()
            .mailboxes
            .get(path)
            .map(|mbox| mbox.messages.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn flags(&self, path: &str, uid: u32) -> Option<Vec<Flag>> {
        self.state()
            .mailboxes
            .get(path)
            .and_then(|mbox| mbox.messages.get(&uid))
            .map(|msg| msg.flags.clone())
    }

    pub fn source(&self, path: &str, uid: u32) -> Option<Vec<u8>> {
        self.state()
            .mailboxes
            .get(path)
            .and_then(|mbox| mbox.messages.get(&uid))
            .map(|msg| msg.source.clone())
    }

    /// Return the UIDs of the messages of the given mailbox whose
    /// Message-ID header contains the given value.
    pub fn search_message_id(&self, path: &str, message_id: &str) -> Vec<u32> {
        let key = SearchKey::Header("Message-ID".into(), message_id.to_owned());

        self.state()
            .mailboxes
            .get(path)
            .map(|mbox| {
                mbox.messages
                    .iter()
                    .filter(|(_, msg)| msg.matches(&key))
                    .map(|(uid, _)| *uid)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_mailbox(&self, path: &str) -> bool {
        self.state().mailboxes.contains_key(path)
    }

    fn live_connections(&self) -> Vec<Arc<MemoryConnection>> {
        let mut state = self.state();
        state.connections.retain(|conn| conn.strong_count() > 0);
        state.connections.iter().filter_map(Weak::upgrade).collect()
    }
}

/// The connector of the in-memory server.
pub struct MemoryConnector {
    server: MailServer,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, params: &ConnectionParams) -> ConnectionResult<Arc<dyn Connection>> {
        let mut state = self.server.state();
        state.connects += 1;

        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            debug!(host = %params.host, "refusing connection");
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused").into());
        }

        state.logins.push(params.auth.clone());

        let conn = Arc::new(MemoryConnection {
            id: state.connects,
            server: self.server.clone(),
            open: AtomicBool::new(true),
            idling: AtomicBool::new(false),
            selected: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        });

        state.connections.push(Arc::downgrade(&conn));
        debug!(id = conn.id, "connection accepted");

        Ok(conn)
    }
}

/// A connection to the in-memory server.
pub struct MemoryConnection {
    id: usize,
    server: MailServer,
    open: AtomicBool,
    idling: AtomicBool,
    selected: Mutex<Option<String>>,
    listeners: Mutex<Vec<(SubscriptionId, ConnectionListener)>>,
    next_subscription: AtomicU64,
}

impl MemoryConnection {
    fn is_idling(&self) -> bool {
        self.idling.load(Ordering::SeqCst)
    }

    fn selected(&self) -> Option<String> {
        lock(&self.selected).clone()
    }

    fn emit(&self, event: &ConnectionEvent) {
        let listeners: Vec<_> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            listener(event);
        }
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!(id = self.id, "connection closed");
            self.emit(&ConnectionEvent::Closed);
        }
    }

    fn command(&self) -> ConnectionResult<()> {
        if self.is_usable() {
            Ok(())
        } else {
            Err(ConnectionError::Closed)
        }
    }

    /// Run the given function against the selected mailbox.
    fn with_selected<T>(&self, f: impl FnOnce(&mut Mailbox) -> ConnectionResult<T>) -> ConnectionResult<T> {
        self.command()?;

        let Some(path) = self.selected() else {
            return Err(ConnectionError::Bad("no mailbox selected".into()));
        };

        let mut state = self.server.state();

        match state.mailboxes.get_mut(&path) {
            Some(mbox) => f(mbox),
            None => Err(ConnectionError::No(format!("mailbox {path} does not exist"))),
        }
    }
}

fn entries(mailboxes: &BTreeMap<String, Mailbox>, parent: Option<&str>) -> Vec<MailboxEntry> {
    let parent_of = |path: &str| {
        path.rsplit_once('/')
            .map(|(parent, _)| parent)
            .filter(|parent| mailboxes.contains_key(*parent))
            .map(ToOwned::to_owned)
    };

    mailboxes
        .iter()
        .filter(|(path, _)| parent_of(path.as_str()).as_deref() == parent)
        .map(|(path, mbox)| MailboxEntry {
            name: path.rsplit('/').next().unwrap_or(path).to_owned(),
            path: path.clone(),
            delimiter: Some('/'),
            flags: mbox.attributes.clone(),
            special_use: mbox.special_use.clone(),
            children: entries(mailboxes, Some(path)),
        })
        .collect()
}

#[async_trait]
impl Connection for MemoryConnection {
    fn is_usable(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn has_capability(&self, capability: &str) -> bool {
        self.server.state().capabilities.contains(capability)
    }

    fn subscribe(&self, listener: ConnectionListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        lock(&self.listeners).push((id, listener));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        lock(&self.listeners).retain(|(sub, _)| *sub != id);
    }

    async fn disconnect(&self) -> ConnectionResult<()> {
        self.close();
        Ok(())
    }

    async fn noop(&self) -> ConnectionResult<()> {
        self.command()
    }

    async fn list(&self) -> ConnectionResult<Vec<MailboxEntry>> {
        self.command()?;
        Ok(entries(&self.server.state().mailboxes, None))
    }

    async fn create(&self, path: &str) -> ConnectionResult<()> {
        self.command()?;

        let mut state = self.server.state();

        if state.mailboxes.contains_key(path) {
            return Err(ConnectionError::No(format!("mailbox {path} already exists")));
        }

        state.mailboxes.insert(path.to_owned(), Mailbox::new(&[]));
        Ok(())
    }

    async fn select(&self, path: &str) -> ConnectionResult<MailboxStatus> {
        self.command()?;

        let status = {
            let state = self.server.state();

            if state.failing_selects.contains(path) {
                return Err(ConnectionError::No(format!("cannot select mailbox {path}")));
            }

            match state.mailboxes.get(path) {
                Some(mbox) if mbox.attributes.iter().any(|a| a == "\\Noselect") => {
                    return Err(ConnectionError::No(format!("mailbox {path} is not selectable")));
                }
                Some(mbox) => mbox.status(),
                None => return Err(ConnectionError::No(format!("mailbox {path} does not exist"))),
            }
        };

        *lock(&self.selected) = Some(path.to_owned());
        Ok(status)
    }

    async fn search(&self, query: &SearchQuery) -> ConnectionResult<Vec<u32>> {
        self.with_selected(|mbox| {
            Ok(mbox
                .messages
                .iter()
                .filter(|(_, msg)| query.keys().iter().all(|key| msg.matches(key)))
                .map(|(uid, _)| *uid)
                .collect())
        })
    }

    async fn fetch(&self, uid: u32, query: FetchQuery) -> ConnectionResult<Option<FetchedMessage>> {
        if self.server.state().failing_fetches.contains(&uid) {
            return Err(ConnectionError::No(format!("cannot fetch message {uid}")));
        }

        self.with_selected(|mbox| {
            Ok(mbox.messages.get(&uid).map(|msg| FetchedMessage {
                uid,
                flags: msg.flags.clone(),
                size: Some(msg.source.len() as u32),
                internal_date: Some(msg.internal_date),
                headers: matches!(query, FetchQuery::Headers).then(|| msg.header_section().to_vec()),
                body: matches!(query, FetchQuery::Full).then(|| msg.source.clone()),
            }))
        })
    }

    async fn add_flags(&self, uids: &[u32], flags: &[Flag]) -> ConnectionResult<()> {
        self.with_selected(|mbox| {
            for uid in uids {
                let Some(msg) = mbox.messages.get_mut(uid) else {
                    continue;
                };

                for flag in flags {
                    if !msg.flags.contains(flag) {
                        msg.flags.push(flag.clone());
                    }
                }
            }

            Ok(())
        })
    }

    async fn remove_flags(&self, uids: &[u32], flags: &[Flag]) -> ConnectionResult<()> {
        self.with_selected(|mbox| {
            for uid in uids {
                if let Some(msg) = mbox.messages.get_mut(uid) {
                    msg.flags.retain(|flag| !flags.contains(flag));
                }
            }

            Ok(())
        })
    }

    async fn expunge(&self) -> ConnectionResult<()> {
        self.with_selected(|mbox| {
            mbox.messages.retain(|_, msg| !msg.has_flag(&Flag::Deleted));
            Ok(())
        })
    }

    async fn copy(&self, uids: &[u32], dest: &str) -> ConnectionResult<()> {
        let copies = self.with_selected(|mbox| {
            Ok(uids
                .iter()
                .filter_map(|uid| mbox.messages.get(uid).cloned())
                .collect::<Vec<_>>())
        })?;

        let mut state = self.server.state();

        let Some(dest_mbox) = state.mailboxes.get_mut(dest) else {
            return Err(ConnectionError::No(format!("[TRYCREATE] mailbox {dest} does not exist")));
        };

        for mut msg in copies {
            msg.flags.retain(|flag| *flag != Flag::Deleted);
            dest_mbox.append(msg);
        }

        Ok(())
    }

    async fn move_messages(&self, uids: &[u32], dest: &str) -> ConnectionResult<()> {
        if !self.has_capability(MOVE_CAPABILITY) {
            return Err(ConnectionError::Bad("MOVE not supported".into()));
        }

        self.copy(uids, dest).await?;

        if self.server.state().move_leaves_source {
            return Ok(());
        }

        self.with_selected(|mbox| {
            for uid in uids {
                mbox.messages.remove(uid);
            }

            Ok(())
        })
    }

    async fn append(&self, path: &str, content: &[u8], flags: &[Flag]) -> ConnectionResult<Option<u32>> {
        self.command()?;

        let mut state = self.server.state();

        let Some(mbox) = state.mailboxes.get_mut(path) else {
            return Err(ConnectionError::No(format!("[TRYCREATE] mailbox {path} does not exist")));
        };

        let uid = mbox.append(StoredMessage {
            flags: flags.to_vec(),
            source: content.to_vec(),
            internal_date: Utc::now(),
        });

        Ok(Some(uid))
    }

    async fn idle(&self) -> ConnectionResult<()> {
        self.with_selected(|_| Ok(()))?;
        self.idling.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn idle_done(&self) -> ConnectionResult<()> {
        self.command()?;
        self.idling.store(false, Ordering::SeqCst);
        Ok(())
    }
}
