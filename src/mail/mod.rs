pub mod decode;
pub mod error;
pub mod imap;
pub mod session;

use serde::{Deserialize, Serialize};

pub use error::{MailError, Result};

/// Format reported when no body part could be resolved.
pub const UNKNOWN: &str = "Unknown";
/// Body reported when no body part could be resolved.
pub const ANALYSIS_FAILED: &str = "Analysis failed.";

/// One decoded message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailRecord {
    pub uid: String,
    pub msg_id: String,
    pub header: String,
    pub from: String,
    pub to: String,
    pub cc: String,
    pub subject: String,
    /// `YYYY/MM/DD` in the requested timezone, empty if Date is missing or bad.
    pub date: String,
    /// `HH:MM:SS` in the requested timezone, empty if Date is missing or bad.
    pub time: String,
    pub format: String,
    pub charset: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    /// Base64 of the transfer-decoded payload.
    pub file_obj: String,
}

/// Number of messages flagged `\Deleted` and expunged by one delete call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub count: usize,
}
