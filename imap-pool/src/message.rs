//! # Message
//!
//! Module dedicated to the domain records built from fetched
//! messages: the header-only [`Envelope`], the parsed [`Message`] and
//! the unparsed [`RawMessage`].

use chrono::{DateTime, Utc};
use mail_parser::{Addr, Address as ParsedAddress, MessageParser, MimeHeaders};

use crate::{connection::FetchedMessage, flag::Flag};

/// A mailbox address.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct Address {
    pub name: Option<String>,
    pub addr: String,
}

impl Address {
    fn from_addr(addr: &Addr) -> Option<Self> {
        Some(Self {
            name: addr.name.as_ref().map(|name| name.to_string()),
            addr: addr.address.as_ref()?.to_string(),
        })
    }

    fn from_parsed(addr: Option<&ParsedAddress>) -> Vec<Self> {
        match addr {
            Some(ParsedAddress::List(addrs)) => addrs.iter().filter_map(Self::from_addr).collect(),
            Some(ParsedAddress::Group(groups)) => groups
                .iter()
                .flat_map(|group| group.addresses.iter())
                .filter_map(Self::from_addr)
                .collect(),
            None => Vec::new(),
        }
    }
}

/// The header projection of a message.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct Envelope {
    pub uid: u32,

    /// The Message-ID header, without angle brackets.
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub subject: Option<String>,
    pub from: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,

    /// The Date header, or the internal date if the header is missing
    /// or invalid.
    pub date: Option<DateTime<Utc>>,
    pub flags: Vec<Flag>,
    pub size: Option<u32>,
    pub seen: bool,
}

impl Envelope {
    /// Build an envelope from a fetched message, using its header
    /// section or its full source, whichever is available.
    ///
    /// Headers that cannot be parsed are left empty.
    pub fn from_fetched(fetched: &FetchedMessage) -> Self {
        let mut envelope = Self {
            uid: fetched.uid,
            date: fetched.internal_date,
            flags: fetched.flags.clone(),
            size: fetched.size,
            seen: fetched.flags.contains(&Flag::Seen),
            ..Default::default()
        };

        let raw = fetched.headers.as_deref().or(fetched.body.as_deref());

        if let Some(msg) = raw.and_then(|raw| MessageParser::new().parse(raw)) {
            envelope.message_id = msg.message_id().map(ToOwned::to_owned);
            envelope.in_reply_to = msg.in_reply_to().as_text().map(ToOwned::to_owned);
            envelope.subject = msg.subject().map(ToOwned::to_owned);
            envelope.from = Address::from_parsed(msg.from());
            envelope.to = Address::from_parsed(msg.to());
            envelope.cc = Address::from_parsed(msg.cc());

            if let Some(date) = msg
                .date()
                .and_then(|date| DateTime::from_timestamp(date.to_timestamp(), 0))
            {
                envelope.date = Some(date);
            }
        }

        envelope
    }
}

/// An attachment descriptor. Contents are not kept.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct Attachment {
    pub filename: Option<String>,
    pub mime: String,
    pub size: usize,
}

/// A fully parsed message.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct Message {
    pub envelope: Envelope,
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// Parse the full source of a fetched message. Return `None` if
    /// the source is missing or cannot be parsed as a message.
    pub fn parse(fetched: &FetchedMessage) -> Option<Self> {
        let body = fetched.body.as_deref()?;
        let msg = MessageParser::new().parse(body)?;

        let attachments = msg
            .attachments()
            .map(|part| Attachment {
                filename: part.attachment_name().map(ToOwned::to_owned),
                mime: part
                    .content_type()
                    .map(|ctype| match ctype.subtype() {
                        Some(stype) => format!("{}/{stype}", ctype.ctype()),
                        None => ctype.ctype().to_owned(),
                    })
                    .unwrap_or_else(|| String::from("application/octet-stream")),
                size: part.len(),
            })
            .collect();

        Some(Self {
            envelope: Envelope::from_fetched(fetched),
            text: msg.body_text(0).map(|text| text.into_owned()),
            html: msg.body_html(0).map(|html| html.into_owned()),
            attachments,
        })
    }
}

/// An unparsed message, as needed by bulk ingestion.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RawMessage {
    pub uid: u32,
    pub flags: Vec<Flag>,
    pub source: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::{Envelope, Message};
    use crate::{connection::FetchedMessage, flag::Flag};

    const RAW: &str = concat!(
        "Message-ID: <abc@localhost>\r\n",
        "In-Reply-To: <parent@localhost>\r\n",
        "From: Alice <alice@localhost>\r\n",
        "To: bob@localhost, Carol <carol@localhost>\r\n",
        "Subject: Hello\r\n",
        "Date: Mon, 1 Jan 2024 12:00:00 +0000\r\n",
        "Content-Type: text/plain\r\n",
        "\r\n",
        "Hello, world!\r\n",
    );

    #[test]
    fn envelope_from_headers() {
        let fetched = FetchedMessage {
            uid: 42,
            flags: vec![Flag::Seen],
            size: Some(RAW.len() as u32),
            headers: Some(RAW.as_bytes().to_vec()),
            ..Default::default()
        };

        let envelope = Envelope::from_fetched(&fetched);

        assert_eq!(envelope.uid, 42);
        assert!(envelope.seen);
        assert_eq!(envelope.message_id.as_deref(), Some("abc@localhost"));
        assert_eq!(envelope.in_reply_to.as_deref(), Some("parent@localhost"));
        assert_eq!(envelope.subject.as_deref(), Some("Hello"));
        assert_eq!(envelope.from[0].name.as_deref(), Some("Alice"));
        assert_eq!(envelope.from[0].addr, "alice@localhost");
        assert_eq!(envelope.to.len(), 2);
        assert_eq!(
            envelope.date.map(|d| d.to_rfc3339()).as_deref(),
            Some("2024-01-01T12:00:00+00:00")
        );
    }

    #[test]
    fn parse_full_message() {
        let fetched = FetchedMessage {
            uid: 1,
            body: Some(RAW.as_bytes().to_vec()),
            ..Default::default()
        };

        let msg = Message::parse(&fetched).unwrap();

        assert_eq!(msg.envelope.subject.as_deref(), Some("Hello"));
        assert_eq!(msg.text.as_deref().map(str::trim), Some("Hello, world!"));
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn parse_missing_body() {
        let fetched = FetchedMessage {
            uid: 1,
            ..Default::default()
        };

        assert!(Message::parse(&fetched).is_none());
    }
}
