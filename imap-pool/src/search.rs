//! # Search
//!
//! Module dedicated to message search criteria and listing options.

use chrono::NaiveDate;

use crate::connection::{SearchKey, SearchQuery};

/// The message search criteria.
///
/// Defined criteria are AND-ed. Empty criteria match all messages.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case", default)
)]
pub struct SearchCriteria {
    pub seen: Option<bool>,
    pub flagged: Option<bool>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub before: Option<NaiveDate>,
    pub since: Option<NaiveDate>,
    pub larger: Option<u64>,
    pub smaller: Option<u64>,
}

impl SearchCriteria {
    pub fn to_query(&self) -> SearchQuery {
        let mut keys = Vec::new();

        match self.seen {
            Some(true) => keys.push(SearchKey::Seen),
            Some(false) => keys.push(SearchKey::Unseen),
            None => (),
        }

        match self.flagged {
            Some(true) => keys.push(SearchKey::Flagged),
            Some(false) => keys.push(SearchKey::Unflagged),
            None => (),
        }

        if let Some(from) = &self.from {
            keys.push(SearchKey::From(from.clone()));
        }

        if let Some(to) = &self.to {
            keys.push(SearchKey::To(to.clone()));
        }

        if let Some(subject) = &self.subject {
            keys.push(SearchKey::Subject(subject.clone()));
        }

        if let Some(body) = &self.body {
            keys.push(SearchKey::Body(body.clone()));
        }

        if let Some(date) = self.before {
            keys.push(SearchKey::Before(date));
        }

        if let Some(date) = self.since {
            keys.push(SearchKey::Since(date));
        }

        if let Some(size) = self.larger {
            keys.push(SearchKey::Larger(size));
        }

        if let Some(size) = self.smaller {
            keys.push(SearchKey::Smaller(size));
        }

        if keys.is_empty() {
            SearchQuery::all()
        } else {
            SearchQuery(keys)
        }
    }
}

/// The key messages of a listing are sorted by.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum SortKey {
    /// Sort by UID, which follows the arrival order.
    #[default]
    Uid,

    /// Sort the fetched page by date. Pagination still follows UIDs.
    Date,
}

/// The listing options.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case", default)
)]
pub struct ListOptions {
    /// The maximum number of messages to return.
    pub limit: Option<usize>,

    /// The number of messages to skip.
    pub offset: usize,

    pub sort: SortKey,

    /// Newest first when `true`, which is the default.
    pub descending: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: None,
            offset: 0,
            sort: SortKey::default(),
            descending: true,
        }
    }
}

impl ListOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_sort(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    /// Sort the given UIDs, then apply offset and limit.
    pub fn paginate(&self, mut uids: Vec<u32>) -> Vec<u32> {
        uids.sort_unstable();

        if self.descending {
            uids.reverse();
        }

        let page = uids.into_iter().skip(self.offset);

        match self.limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        }
    }
}
