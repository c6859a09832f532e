//! Message reading operations of the [`MailClient`].

use futures::future::join_all;
use tracing::{debug, instrument, warn};

use super::MailClient;
use crate::{
    connection::{FetchQuery, FetchedMessage, SearchQuery},
    message::{Envelope, Message, RawMessage},
    pool::ConnectionHandle,
    search::{ListOptions, SearchCriteria, SortKey},
    Error, Result,
};

/// The header carrying the message identifier.
pub const MESSAGE_ID_HEADER: &str = "Message-ID";

impl MailClient {
    /// List the envelopes of the given folder, newest first unless
    /// told otherwise.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn get_messages(&mut self, folder: &str, opts: &ListOptions) -> Result<Vec<Envelope>> {
        self.search_messages(folder, &SearchCriteria::default(), opts)
            .await
    }

    /// List the envelopes of the given folder matching the given
    /// criteria.
    ///
    /// Envelopes of the page are fetched concurrently. A message that
    /// cannot be fetched is left out of the page.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn search_messages(
        &mut self,
        folder: &str,
        criteria: &SearchCriteria,
        opts: &ListOptions,
    ) -> Result<Vec<Envelope>> {
        let conn = self.connection().await?;
        let res = search_envelopes(&conn, folder, &criteria.to_query(), opts).await;
        self.finish();
        res
    }

    /// Fetch and parse the message matching the given UID.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn get_message(&mut self, folder: &str, uid: u32) -> Result<Message> {
        let conn = self.connection().await?;

        let res = fetch_full(&conn, folder, uid).await.and_then(|fetched| {
            Message::parse(&fetched).ok_or_else(|| Error::InvalidBodyTypeError(folder.to_owned(), uid))
        });

        self.finish();
        res
    }

    /// Fetch the source of the message matching the given UID,
    /// without parsing it.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn get_message_raw(&mut self, folder: &str, uid: u32) -> Result<RawMessage> {
        let conn = self.connection().await?;
        let res = fetch_full(&conn, folder, uid).await.map(into_raw);
        self.finish();
        res
    }

    /// Fetch the sources of the messages matching the given UIDs,
    /// without parsing them.
    ///
    /// Messages are fetched concurrently. A message that cannot be
    /// fetched is left out.
    #[instrument(skip(self, uids), fields(key = %self.key, count = uids.len()))]
    pub async fn get_messages_raw(&mut self, folder: &str, uids: &[u32]) -> Result<Vec<RawMessage>> {
        let conn = self.connection().await?;
        let res = fetch_raw_batch(&conn, folder, uids).await;
        self.finish();
        res
    }

    /// Find the envelope of the message carrying the given
    /// Message-ID. The most recent one wins if there are many.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn find_message_by_message_id(
        &mut self,
        folder: &str,
        message_id: &str,
    ) -> Result<Option<Envelope>> {
        let conn = self.connection().await?;
        let res = find_by_message_id(&conn, folder, message_id).await;
        self.finish();
        res
    }
}

pub(super) async fn select(conn: &ConnectionHandle, folder: &str) -> Result<()> {
    debug!(folder, "selecting folder");

    conn.select(folder)
        .await
        .map(|_| ())
        .map_err(|err| Error::SelectFolderError(err, folder.to_owned()))
}

pub(super) async fn search_uids(
    conn: &ConnectionHandle,
    folder: &str,
    query: &SearchQuery,
) -> Result<Vec<u32>> {
    conn.search(query)
        .await
        .map_err(|err| Error::SearchMessagesError(err, folder.to_owned()))
}

async fn search_envelopes(
    conn: &ConnectionHandle,
    folder: &str,
    query: &SearchQuery,
    opts: &ListOptions,
) -> Result<Vec<Envelope>> {
    select(conn, folder).await?;

    let uids = search_uids(conn, folder, query).await?;
    let page = opts.paginate(uids);
    debug!(folder, page = page.len(), "fetching envelopes");

    let mut envelopes = fetch_envelopes(conn, folder, &page).await;

    if opts.sort == SortKey::Date {
        envelopes.sort_by(|a, b| a.date.cmp(&b.date));

        if opts.descending {
            envelopes.reverse();
        }
    }

    Ok(envelopes)
}

/// Fetch the header projections of the given UIDs concurrently,
/// keeping the order of the UIDs and leaving out failures.
async fn fetch_envelopes(conn: &ConnectionHandle, folder: &str, uids: &[u32]) -> Vec<Envelope> {
    let fetches = uids.iter().map(|uid| conn.fetch(*uid, FetchQuery::Headers));
    let results = join_all(fetches).await;

    uids.iter()
        .zip(results)
        .filter_map(|(uid, res)| match res {
            Ok(Some(fetched)) => Some(Envelope::from_fetched(&fetched)),
            Ok(None) => {
                debug!(folder, uid, "message vanished, skipping it");
                None
            }
            Err(err) => {
                warn!(folder, uid, "cannot fetch envelope, skipping it: {err}");
                None
            }
        })
        .collect()
}

async fn fetch_full(conn: &ConnectionHandle, folder: &str, uid: u32) -> Result<FetchedMessage> {
    select(conn, folder).await?;

    let fetched = conn
        .fetch(uid, FetchQuery::Full)
        .await
        .map_err(|err| Error::FetchMessageError(err, folder.to_owned(), uid))?
        .ok_or_else(|| Error::MessageNotFoundError(folder.to_owned(), uid))?;

    match fetched.body.as_deref() {
        Some(body) if !body.is_empty() => Ok(fetched),
        _ => Err(Error::BodyNotFoundError(folder.to_owned(), uid)),
    }
}

fn into_raw(fetched: FetchedMessage) -> RawMessage {
    RawMessage {
        uid: fetched.uid,
        flags: fetched.flags,
        source: fetched.body.unwrap_or_default(),
    }
}

async fn fetch_raw_batch(conn: &ConnectionHandle, folder: &str, uids: &[u32]) -> Result<Vec<RawMessage>> {
    select(conn, folder).await?;

    let fetches = uids.iter().map(|uid| conn.fetch(*uid, FetchQuery::Full));
    let results = join_all(fetches).await;

    let messages = uids
        .iter()
        .zip(results)
        .filter_map(|(uid, res)| match res {
            Ok(Some(fetched)) if fetched.body.as_ref().is_some_and(|b| !b.is_empty()) => {
                Some(into_raw(fetched))
            }
            Ok(_) => {
                debug!(folder, uid, "message or body not found, skipping it");
                None
            }
            Err(err) => {
                warn!(folder, uid, "cannot fetch message, skipping it: {err}");
                None
            }
        })
        .collect();

    Ok(messages)
}

async fn find_by_message_id(
    conn: &ConnectionHandle,
    folder: &str,
    message_id: &str,
) -> Result<Option<Envelope>> {
    select(conn, folder).await?;

    let query = SearchQuery::header(MESSAGE_ID_HEADER, message_id);
    let uids = search_uids(conn, folder, &query).await?;

    let Some(uid) = uids.into_iter().max() else {
        return Ok(None);
    };

    let fetched = conn
        .fetch(uid, FetchQuery::Headers)
        .await
        .map_err(|err| Error::FetchMessageError(err, folder.to_owned(), uid))?;

    Ok(fetched.as_ref().map(Envelope::from_fetched))
}
