use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use charset::Charset;
use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use mailparse::body::Body;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use thiserror::Error;
use tracing::{debug, warn};

use crate::mail::{Attachment, MailError, MailRecord, Result, ANALYSIS_FAILED, UNKNOWN};

/// A message's MIME structure: multiparts with ordered children, or leaves.
pub enum MimeNode<'a> {
    Multipart {
        subtype: String,
        part: &'a ParsedMail<'a>,
        children: Vec<MimeNode<'a>>,
    },
    Leaf(Leaf<'a>),
}

pub struct Leaf<'a> {
    pub mimetype: String,
    /// The `charset` parameter as written, if any.
    pub charset: Option<String>,
    pub disposition: DispositionType,
    pub filename: Option<String>,
    part: &'a ParsedMail<'a>,
}

impl<'a> MimeNode<'a> {
    pub fn from_parsed(part: &'a ParsedMail<'a>) -> Self {
        let mimetype = part.ctype.mimetype.to_ascii_lowercase();

        if let Some(subtype) = mimetype.strip_prefix("multipart/") {
            return MimeNode::Multipart {
                subtype: subtype.to_string(),
                part,
                children: part.subparts.iter().map(MimeNode::from_parsed).collect(),
            };
        }

        let disposition = part.get_content_disposition();
        let filename = disposition
            .params
            .get("filename")
            .or_else(|| part.ctype.params.get("name"))
            .filter(|name| !name.is_empty())
            .cloned();

        MimeNode::Leaf(Leaf {
            mimetype,
            charset: part.ctype.params.get("charset").cloned(),
            disposition: disposition.disposition,
            filename,
            part,
        })
    }

    fn part(&self) -> &'a ParsedMail<'a> {
        match self {
            MimeNode::Multipart { part, .. } => *part,
            MimeNode::Leaf(leaf) => leaf.part,
        }
    }

    fn is_attachment(&self) -> bool {
        match self {
            MimeNode::Leaf(leaf) => leaf.is_attachment(),
            MimeNode::Multipart { part, .. } => {
                part.get_content_disposition().disposition == DispositionType::Attachment
            }
        }
    }

    fn mimetype(&self) -> String {
        match self {
            MimeNode::Multipart { subtype, .. } => format!("multipart/{subtype}"),
            MimeNode::Leaf(leaf) => leaf.mimetype.clone(),
        }
    }

    fn content_id(&self) -> Option<String> {
        self.part().headers.get_first_value("Content-ID")
    }

    /// Leaves in document order.
    pub fn leaves(&self) -> Vec<&Leaf<'a>> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'n>(&'n self, out: &mut Vec<&'n Leaf<'a>>) {
        match self {
            MimeNode::Multipart { children, .. } => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            MimeNode::Leaf(leaf) => out.push(leaf),
        }
    }
}

impl Leaf<'_> {
    pub fn is_attachment(&self) -> bool {
        self.disposition == DispositionType::Attachment
    }

    /// Declared charset, or `Unknown` when the part names none.
    pub fn reported_charset(&self) -> String {
        self.charset.clone().unwrap_or_else(|| UNKNOWN.to_string())
    }

    /// Transfer-encoded body exactly as it appears in the message.
    pub fn raw_payload(&self) -> String {
        match self.part.get_body_encoded() {
            Body::Base64(b) | Body::QuotedPrintable(b) => String::from_utf8_lossy(b.get_raw()).into_owned(),
            Body::SevenBit(b) | Body::EightBit(b) => String::from_utf8_lossy(b.get_raw()).into_owned(),
            Body::Binary(b) => String::from_utf8_lossy(b.get_raw()).into_owned(),
        }
    }
}

/// `Name: Value` per header field, in order, duplicates kept.
pub fn header_text(mail: &ParsedMail) -> String {
    mail.headers
        .iter()
        .map(|h| format!("{}: {}\n", h.get_key(), h.get_value()))
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Content {
    pub body: String,
    pub format: String,
    pub charset: String,
}

/// Why the preferred body could not be decoded.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BodyError {
    #[error("no text body part")]
    NoBodyPart,
    #[error("unknown charset {0:?}")]
    UnknownCharset(String),
    #[error("payload is not valid {0}")]
    Malformed(String),
    #[error("transfer encoding: {0}")]
    TransferEncoding(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MainContent {
    Decoded(Content),
    Fallback { content: Content, reason: BodyError },
}

impl MainContent {
    pub fn content(&self) -> &Content {
        match self {
            MainContent::Decoded(content) | MainContent::Fallback { content, .. } => content,
        }
    }

    pub fn into_content(self) -> Content {
        match self {
            MainContent::Decoded(content) | MainContent::Fallback { content, .. } => content,
        }
    }
}

/// Decode the preferred body part; when that fails, surface the first
/// text/plain part's raw payload instead of decoding again.
pub fn main_content(tree: &MimeNode) -> MainContent {
    match decoded_body(tree) {
        Ok(content) => MainContent::Decoded(content),
        Err(reason) => MainContent::Fallback {
            content: raw_text_plain(tree),
            reason,
        },
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Preference {
    Plain,
    Html,
}

fn body_candidates<'n, 'a>(node: &'n MimeNode<'a>, out: &mut Vec<(Preference, &'n Leaf<'a>)>) {
    if node.is_attachment() {
        return;
    }

    match node {
        MimeNode::Leaf(leaf) => match leaf.mimetype.as_str() {
            "text/plain" => out.push((Preference::Plain, leaf)),
            "text/html" => out.push((Preference::Html, leaf)),
            _ => {}
        },
        MimeNode::Multipart { subtype, part, children } if subtype == "related" => {
            let start = part.ctype.params.get("start");
            let root = start
                .and_then(|cid| {
                    children
                        .iter()
                        .find(|child| child.content_id().as_ref() == Some(cid))
                })
                .or_else(|| children.first());
            if let Some(root) = root {
                body_candidates(root, out);
            }
        }
        MimeNode::Multipart { children, .. } => {
            for child in children {
                body_candidates(child, out);
            }
        }
    }
}

/// The body part a reader would see: text/plain over text/html, first wins.
pub fn preferred_body<'n, 'a>(tree: &'n MimeNode<'a>) -> Option<&'n Leaf<'a>> {
    let mut candidates = Vec::new();
    body_candidates(tree, &mut candidates);
    candidates
        .into_iter()
        .min_by_key(|(preference, _)| *preference)
        .map(|(_, leaf)| leaf)
}

fn decoded_body(tree: &MimeNode) -> std::result::Result<Content, BodyError> {
    let leaf = preferred_body(tree).ok_or(BodyError::NoBodyPart)?;

    let bytes = leaf
        .part
        .get_body_raw()
        .map_err(|e| BodyError::TransferEncoding(e.to_string()))?;
    // mailparse falls back to us-ascii when nothing is declared.
    let label = &leaf.part.ctype.charset;
    let charset = Charset::for_label(label.as_bytes())
        .ok_or_else(|| BodyError::UnknownCharset(label.clone()))?;
    let (text, had_errors) = charset.decode_without_bom_handling(&bytes);
    if had_errors {
        return Err(BodyError::Malformed(label.clone()));
    }

    Ok(Content {
        body: text.into_owned(),
        format: leaf.mimetype.clone(),
        charset: leaf.reported_charset(),
    })
}

fn raw_text_plain(tree: &MimeNode) -> Content {
    tree.leaves()
        .into_iter()
        .find(|leaf| leaf.mimetype == "text/plain")
        .map(|leaf| Content {
            body: leaf.raw_payload(),
            format: leaf.mimetype.clone(),
            charset: leaf.reported_charset(),
        })
        .unwrap_or_else(sentinel_content)
}

fn sentinel_content() -> Content {
    Content {
        body: ANALYSIS_FAILED.to_string(),
        format: UNKNOWN.to_string(),
        charset: UNKNOWN.to_string(),
    }
}

/// Children of the root that are not part of the body.
///
/// Only a non-alternative multipart root has any. For multipart/related
/// everything but the start part qualifies; otherwise the first
/// non-attachment text/plain, text/html, multipart/related and
/// multipart/alternative child each count as body and are skipped.
fn attachment_parts<'n, 'a>(tree: &'n MimeNode<'a>) -> Vec<&'n MimeNode<'a>> {
    let MimeNode::Multipart { subtype, part, children } = tree else {
        return Vec::new();
    };

    match subtype.as_str() {
        "alternative" => Vec::new(),
        "related" => {
            let start = part.ctype.params.get("start");
            let start_index = start
                .and_then(|cid| {
                    children
                        .iter()
                        .position(|child| child.content_id().as_ref() == Some(cid))
                })
                .unwrap_or(0);
            children
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != start_index)
                .map(|(_, child)| child)
                .collect()
        }
        _ => {
            let mut seen = Vec::new();
            children
                .iter()
                .filter(|child| {
                    let mimetype = child.mimetype();
                    let body_type = matches!(
                        mimetype.as_str(),
                        "text/plain" | "text/html" | "multipart/related" | "multipart/alternative"
                    );
                    if body_type && !child.is_attachment() && !seen.contains(&mimetype) {
                        seen.push(mimetype);
                        return false;
                    }
                    true
                })
                .collect()
        }
    }
}

/// Named attachment parts, base64-encoded, in document order.
pub fn attachments(tree: &MimeNode) -> Result<Vec<Attachment>> {
    let mut out = Vec::new();
    for node in attachment_parts(tree) {
        let MimeNode::Leaf(leaf) = node else {
            continue;
        };
        let Some(file_name) = leaf.filename.clone() else {
            continue;
        };

        let payload = leaf.part.get_body_raw().map_err(|source| MailError::Attachment {
            file_name: file_name.clone(),
            source,
        })?;
        out.push(Attachment {
            file_name,
            file_obj: STANDARD.encode(payload),
        });
    }
    Ok(out)
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| MailError::InvalidTimezone(name.to_string()))
}

/// `("YYYY/MM/DD", "HH:MM:SS")` of an RFC 2822 date seen from `tz`.
pub fn localize_date(raw: &str, tz: Tz) -> Option<(String, String)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let timestamp = mailparse::dateparse(raw).ok()?;
    let local = Utc.timestamp_opt(timestamp, 0).single()?.with_timezone(&tz);
    Some((
        local.format("%Y/%m/%d").to_string(),
        local.format("%H:%M:%S").to_string(),
    ))
}

/// Build a record from one RFC822 message.
///
/// Bytes that do not parse as a message still give a record, carrying only
/// the uid and the body sentinels.
pub fn decode_message(uid: &str, raw: &[u8], tz: Tz) -> Result<MailRecord> {
    let mail = match mailparse::parse_mail(raw) {
        Ok(mail) => mail,
        Err(e) => {
            warn!(uid, error = %e, "message does not parse, keeping an empty record");
            let Content { body, format, charset } = sentinel_content();
            return Ok(MailRecord {
                uid: uid.to_string(),
                format,
                charset,
                body,
                ..MailRecord::default()
            });
        }
    };
    let tree = MimeNode::from_parsed(&mail);

    let header = |name: &str| mail.headers.get_first_value(name).unwrap_or_default();
    let (date, time) = mail
        .headers
        .get_first_value("Date")
        .and_then(|d| localize_date(&d, tz))
        .unwrap_or_default();

    let content = main_content(&tree);
    if let MainContent::Fallback { reason, .. } = &content {
        debug!(uid, %reason, "body not decodable, using raw text/plain payload");
    }
    let Content { body, format, charset } = content.into_content();

    Ok(MailRecord {
        uid: uid.to_string(),
        msg_id: header("Message-Id"),
        header: header_text(&mail),
        from: header("From"),
        to: header("To"),
        cc: header("Cc"),
        subject: header("Subject"),
        date,
        time,
        format,
        charset,
        body,
        attachments: attachments(&tree)?,
    })
}
