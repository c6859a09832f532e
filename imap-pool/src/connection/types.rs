use chrono::{DateTime, NaiveDate, Utc};

use crate::flag::Flag;

/// A mailbox as returned by `LIST`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MailboxEntry {
    /// The last segment of the path.
    pub name: String,

    /// The full path, segments joined by the delimiter.
    pub path: String,

    pub delimiter: Option<char>,

    /// The name attributes (`\Noselect`, `\HasChildren`…).
    pub flags: Vec<String>,

    /// The special-use attribute (`\Drafts`, `\Sent`…), if any.
    pub special_use: Option<String>,

    pub children: Vec<MailboxEntry>,
}

/// The status of a mailbox as returned by `SELECT`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MailboxStatus {
    pub exists: u32,
    pub unseen: Option<u32>,
    pub uid_next: Option<u32>,
}

/// What to fetch for a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FetchQuery {
    /// Flags, size, internal date and the header section only.
    Headers,

    /// Flags, size, internal date and the whole RFC 822 source.
    Full,
}

/// A message as returned by `FETCH`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FetchedMessage {
    pub uid: u32,
    pub flags: Vec<Flag>,
    pub size: Option<u32>,
    pub internal_date: Option<DateTime<Utc>>,

    /// The raw header section, for [`FetchQuery::Headers`].
    pub headers: Option<Vec<u8>>,

    /// The raw RFC 822 source, for [`FetchQuery::Full`].
    pub body: Option<Vec<u8>>,
}

/// A `SEARCH` key. Keys of a [`SearchQuery`] are AND-ed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SearchKey {
    All,
    Seen,
    Unseen,
    Flagged,
    Unflagged,
    From(String),
    To(String),
    Subject(String),
    Body(String),
    Before(NaiveDate),
    Since(NaiveDate),
    Larger(u64),
    Smaller(u64),
    Header(String, String),
}

/// A `SEARCH` query.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SearchQuery(pub Vec<SearchKey>);

impl SearchQuery {
    pub fn all() -> Self {
        Self(vec![SearchKey::All])
    }

    pub fn header(name: impl ToString, value: impl ToString) -> Self {
        Self(vec![SearchKey::Header(name.to_string(), value.to_string())])
    }

    pub fn keys(&self) -> &[SearchKey] {
        &self.0
    }
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self::all()
    }
}
