//! Fetch messages from an IMAP4 server as plain structured records, and
//! expire old ones.

pub mod config;
pub mod mail;

pub use config::{Config, ImapConfig};
pub use mail::decode::{decode_message, MainContent};
pub use mail::imap::{Mailbox, SearchOutcome};
pub use mail::session::{delete_with, fetch_with, with_session, MailClient};
pub use mail::{Attachment, DeleteResult, MailError, MailRecord};
