use thiserror::Error;

/// Errors surfaced by fetch and delete.
#[derive(Debug, Error)]
pub enum MailError {
    /// TLS connector could not be built.
    #[error("tls: {0}")]
    Tls(#[from] native_tls::Error),

    /// Connection, authentication or protocol failure.
    #[error("imap: {0}")]
    Imap(#[from] imap::error::Error),

    /// An attachment payload could not be transfer-decoded.
    #[error("attachment {file_name:?}: {source}")]
    Attachment {
        file_name: String,
        #[source]
        source: mailparse::MailParseError,
    },

    /// The server answered UID FETCH without the RFC822 payload.
    #[error("no message body returned for uid {0}")]
    MissingBody(u32),

    #[error("unknown timezone {0:?}")]
    InvalidTimezone(String),
}

pub type Result<T> = std::result::Result<T, MailError>;
