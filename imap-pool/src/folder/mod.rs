//! # Folder
//!
//! Module dedicated to folder (as known as mailbox) management.
//!
//! The main entities are [`FolderKind`] and [`Folder`]. Folders are
//! built from the nested [`MailboxEntry`] tree returned by the
//! connection, flattened parent first.

use std::fmt;

use crate::connection::{MailboxEntry, MailboxStatus};

pub const INBOX: &str = "INBOX";

/// The name attribute of mailboxes that cannot be selected.
pub const NOSELECT: &str = "\\Noselect";

/// The folder names tried first, in order, when looking for the
/// drafts folder.
pub const DRAFT_FOLDER_NAMES: [&str; 5] =
    ["Drafts", "[Gmail]/Drafts", "Draft", "INBOX.Drafts", "INBOX/Drafts"];

/// The folder kind enumeration.
///
/// The folder kind is a category that gives a specific purpose to a
/// folder, taken from its special-use attribute (RFC 6154).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum FolderKind {
    Inbox,
    Sent,
    Drafts,
    Trash,
    Junk,
    Archive,
}

impl FolderKind {
    /// Find the folder kind matching the given name attribute, with
    /// or without its leading backslash.
    pub fn from_attribute(attr: &str) -> Option<Self> {
        let attr = attr.trim_start_matches('\\');

        if attr.eq_ignore_ascii_case("Sent") {
            Some(Self::Sent)
        } else if attr.eq_ignore_ascii_case("Drafts") {
            Some(Self::Drafts)
        } else if attr.eq_ignore_ascii_case("Trash") {
            Some(Self::Trash)
        } else if attr.eq_ignore_ascii_case("Junk") {
            Some(Self::Junk)
        } else if attr.eq_ignore_ascii_case("Archive") || attr.eq_ignore_ascii_case("All") {
            Some(Self::Archive)
        } else {
            None
        }
    }

    /// Find the folder kind of the given mailbox entry, using first
    /// its special-use attribute, then its name attributes.
    pub fn from_entry(entry: &MailboxEntry) -> Option<Self> {
        if entry.path.eq_ignore_ascii_case(INBOX) {
            return Some(Self::Inbox);
        }

        entry
            .special_use
            .iter()
            .chain(entry.flags.iter())
            .find_map(|attr| Self::from_attribute(attr))
    }

    pub fn is_drafts(&self) -> bool {
        matches!(self, Self::Drafts)
    }
}

impl fmt::Display for FolderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Inbox => "inbox",
            Self::Sent => "sent",
            Self::Drafts => "drafts",
            Self::Trash => "trash",
            Self::Junk => "junk",
            Self::Archive => "archive",
        };

        f.write_str(kind)
    }
}

/// The folder.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct Folder {
    /// The last segment of the folder path.
    pub name: String,

    /// The full folder path, to be used when selecting the folder.
    pub path: String,

    pub delimiter: Option<char>,
    pub flags: Vec<String>,
    pub special_use: Option<String>,
    pub kind: Option<FolderKind>,

    /// The total number of messages, unknown if the folder could not
    /// be selected.
    pub total: Option<u32>,

    /// The number of unseen messages, if reported by the server.
    pub unseen: Option<u32>,
}

impl Folder {
    /// Return `true` if the folder does not carry the `\Noselect`
    /// name attribute.
    pub fn is_selectable(&self) -> bool {
        !self
            .flags
            .iter()
            .any(|flag| flag.eq_ignore_ascii_case(NOSELECT))
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case(flag))
    }

    pub fn set_status(&mut self, status: &MailboxStatus) {
        self.total = Some(status.exists);
        self.unseen = status.unseen;
    }
}

impl From<&MailboxEntry> for Folder {
    fn from(entry: &MailboxEntry) -> Self {
        Self {
            name: entry.name.clone(),
            path: entry.path.clone(),
            delimiter: entry.delimiter,
            flags: entry.flags.clone(),
            special_use: entry.special_use.clone(),
            kind: FolderKind::from_entry(entry),
            total: None,
            unseen: None,
        }
    }
}

/// Flatten the given mailbox tree into a list of folders, every
/// parent followed by its children.
pub fn flatten(entries: &[MailboxEntry]) -> Vec<Folder> {
    fn walk(entries: &[MailboxEntry], folders: &mut Vec<Folder>) {
        for entry in entries {
            folders.push(Folder::from(entry));
            walk(&entry.children, folders);
        }
    }

    let mut folders = Vec::new();
    walk(entries, &mut folders);
    folders
}

/// Find the drafts folder among the given folders.
///
/// Tries, in order: an exact name or path match against
/// [`DRAFT_FOLDER_NAMES`], a case-insensitive match against the same
/// list, a name containing "draft", then the `\Drafts` attribute.
pub fn find_draft_folder(folders: &[Folder]) -> Option<&Folder> {
    let exact = DRAFT_FOLDER_NAMES.iter().find_map(|name| {
        folders
            .iter()
            .find(|f| f.name == *name || f.path == *name)
    });

    if exact.is_some() {
        return exact;
    }

    let case_insensitive = DRAFT_FOLDER_NAMES.iter().find_map(|name| {
        folders
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name) || f.path.eq_ignore_ascii_case(name))
    });

    if case_insensitive.is_some() {
        return case_insensitive;
    }

    let substring = folders
        .iter()
        .find(|f| f.name.to_lowercase().contains("draft"));

    if substring.is_some() {
        return substring;
    }

    folders
        .iter()
        .find(|f| f.kind.map(|k| k.is_drafts()).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::{find_draft_folder, flatten, Folder, FolderKind};
    use crate::connection::MailboxEntry;

    fn entry(path: &str, flags: &[&str], children: Vec<MailboxEntry>) -> MailboxEntry {
        MailboxEntry {
            name: path.rsplit('/').next().unwrap_or(path).to_owned(),
            path: path.to_owned(),
            delimiter: Some('/'),
            flags: flags.iter().map(ToString::to_string).collect(),
            special_use: None,
            children,
        }
    }

    fn folder(path: &str, flags: &[&str]) -> Folder {
        Folder::from(&entry(path, flags, vec![]))
    }

    #[test]
    fn flatten_parent_first() {
        let tree = vec![
            entry("INBOX", &[], vec![]),
            entry(
                "[Gmail]",
                &["\\Noselect"],
                vec![
                    entry("[Gmail]/Sent Mail", &["\\Sent"], vec![]),
                    entry("[Gmail]/Drafts", &["\\Drafts"], vec![]),
                ],
            ),
        ];

        let folders = flatten(&tree);
        let paths: Vec<_> = folders.iter().map(|f| f.path.as_str()).collect();

        assert_eq!(
            paths,
            ["INBOX", "[Gmail]", "[Gmail]/Sent Mail", "[Gmail]/Drafts"]
        );
        assert!(!folders[1].is_selectable());
        assert_eq!(folders[0].kind, Some(FolderKind::Inbox));
        assert_eq!(folders[2].kind, Some(FolderKind::Sent));
        assert_eq!(folders[3].kind, Some(FolderKind::Drafts));
    }

    #[test]
    fn draft_folder_exact_first() {
        let folders = [folder("My drafts", &[]), folder("Drafts", &[])];
        assert_eq!(find_draft_folder(&folders).unwrap().path, "Drafts");
    }

    #[test]
    fn draft_folder_canonical_order() {
        let folders = [folder("INBOX.Drafts", &[]), folder("Draft", &[])];
        assert_eq!(find_draft_folder(&folders).unwrap().path, "Draft");

        let folders = [folder("Draft", &[]), folder("[Gmail]/Drafts", &[])];
        assert_eq!(find_draft_folder(&folders).unwrap().path, "[Gmail]/Drafts");
    }

    #[test]
    fn draft_folder_case_insensitive() {
        let folders = [folder("Old drafts", &[]), folder("DRAFTS", &[])];
        assert_eq!(find_draft_folder(&folders).unwrap().path, "DRAFTS");
    }

    #[test]
    fn draft_folder_substring() {
        let folders = [folder("Brouillons", &["\\Drafts"]), folder("Mes Drafts perso", &[])];
        assert_eq!(find_draft_folder(&folders).unwrap().path, "Mes Drafts perso");
    }

    #[test]
    fn draft_folder_special_use() {
        let folders = [folder("INBOX", &[]), folder("Brouillons", &["\\Drafts"])];
        assert_eq!(find_draft_folder(&folders).unwrap().path, "Brouillons");
    }

    #[test]
    fn draft_folder_not_found() {
        let folders = [folder("INBOX", &[]), folder("Sent", &["\\Sent"])];
        assert!(find_draft_folder(&folders).is_none());
    }
}
