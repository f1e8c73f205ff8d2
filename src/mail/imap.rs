use native_tls::{TlsConnector, TlsStream};
use std::io::{Read, Write};
use std::net::TcpStream;
use tracing::{debug, info};

use crate::config::ImapConfig;
use crate::mail::{MailError, Result};

/// Result of a SEARCH or UID SEARCH.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Matching numbers in the order the server listed them.
    Hits(Vec<u32>),
    /// The server answered `NO`.
    No,
}

/// The IMAP commands fetch and delete need from an authenticated connection.
pub trait Mailbox {
    fn select(&mut self, mailbox: &str) -> Result<()>;
    fn uid_search(&mut self, criteria: &str) -> Result<SearchOutcome>;
    /// Full RFC822 bytes of one message.
    fn uid_fetch_rfc822(&mut self, uid: u32) -> Result<Vec<u8>>;
    fn search(&mut self, criteria: &str) -> Result<SearchOutcome>;
    fn mark_deleted(&mut self, seq: u32) -> Result<()>;
    fn expunge(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    fn logout(&mut self) -> Result<()>;
}

pub struct ImapMailbox<T: Read + Write> {
    session: imap::Session<T>,
}

fn is_localhost(host: &str) -> bool {
    host == "127.0.0.1" || host == "localhost"
}

fn tls_connector_for(cfg: &ImapConfig) -> Result<TlsConnector> {
    let mut b = TlsConnector::builder();

    if is_localhost(&cfg.host) {
        b.danger_accept_invalid_certs(true);
        b.danger_accept_invalid_hostnames(true);
    }

    Ok(b.build()?)
}

/// Open a TLS connection and log in.
pub fn connect(cfg: &ImapConfig) -> Result<ImapMailbox<TlsStream<TcpStream>>> {
    let tls = tls_connector_for(cfg)?;

    info!(host = %cfg.host, port = cfg.port, user = %cfg.username, "connecting");
    let client = if cfg.starttls {
        imap::connect_starttls((cfg.host.as_str(), cfg.port), &cfg.host, &tls)?
    } else {
        imap::connect((cfg.host.as_str(), cfg.port), &cfg.host, &tls)?
    };

    let session = client
        .login(&cfg.username, &cfg.password)
        .map_err(|e| e.0)?;

    Ok(ImapMailbox { session })
}

/// Numbers from the `* SEARCH` lines of a raw response.
pub fn parse_search_response(data: &[u8]) -> Vec<u32> {
    String::from_utf8_lossy(data)
        .lines()
        .filter_map(|line| {
            let prefix = line.get(..8)?;
            prefix.eq_ignore_ascii_case("* SEARCH").then(|| line[8..].to_string())
        })
        .flat_map(|rest| {
            rest.split_whitespace()
                .filter_map(|n| n.parse::<u32>().ok())
                .collect::<Vec<_>>()
        })
        .collect()
}

impl<T: Read + Write> ImapMailbox<T> {
    fn run_search(&mut self, command: String) -> Result<SearchOutcome> {
        debug!(%command, "searching");
        match self.session.run_command_and_read_response(&command) {
            Ok(data) => Ok(SearchOutcome::Hits(parse_search_response(&data))),
            Err(imap::error::Error::No(reason)) => {
                info!(%command, %reason, "search answered NO");
                Ok(SearchOutcome::No)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl<T: Read + Write> Mailbox for ImapMailbox<T> {
    fn select(&mut self, mailbox: &str) -> Result<()> {
        self.session.select(mailbox)?;
        Ok(())
    }

    fn uid_search(&mut self, criteria: &str) -> Result<SearchOutcome> {
        self.run_search(format!("UID SEARCH {criteria}"))
    }

    fn uid_fetch_rfc822(&mut self, uid: u32) -> Result<Vec<u8>> {
        let fetches = self.session.uid_fetch(uid.to_string(), "RFC822")?;
        let raw = fetches
            .iter()
            .next()
            .and_then(|f| f.body())
            .ok_or(MailError::MissingBody(uid))?;
        Ok(raw.to_vec())
    }

    fn search(&mut self, criteria: &str) -> Result<SearchOutcome> {
        self.run_search(format!("SEARCH {criteria}"))
    }

    fn mark_deleted(&mut self, seq: u32) -> Result<()> {
        self.session.store(seq.to_string(), "+FLAGS (\\Deleted)")?;
        Ok(())
    }

    fn expunge(&mut self) -> Result<()> {
        self.session.expunge()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.session.close()?;
        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        self.session.logout()?;
        Ok(())
    }
}
