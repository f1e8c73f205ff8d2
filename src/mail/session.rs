use chrono::{Days, Local, NaiveDate};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::config::{ImapConfig, DEFAULT_DAYS, DEFAULT_SEARCH, DEFAULT_TIMEZONE};
use crate::mail::decode::{self, parse_timezone};
use crate::mail::imap::{self, Mailbox, SearchOutcome};
use crate::mail::{DeleteResult, MailRecord, Result};

/// Fetches and expires mail on one account. Every call opens its own
/// connection and releases it before returning.
#[derive(Clone, Debug)]
pub struct MailClient {
    cfg: ImapConfig,
}

impl MailClient {
    pub fn new(host: &str, username: &str, password: &str) -> Self {
        Self::from_config(ImapConfig::new(host, username, password))
    }

    pub fn from_config(cfg: ImapConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &ImapConfig {
        &self.cfg
    }

    /// Decode every message matching `search`, with dates shown in `timezone`.
    pub fn fetch(&self, search: &str, timezone: &str) -> Result<Vec<MailRecord>> {
        let tz = parse_timezone(timezone)?;
        let mut sess = imap::connect(&self.cfg)?;
        with_session(&mut sess, &self.cfg.mailbox, |s| fetch_with(s, search, tz))
    }

    /// Unread messages, dates in Asia/Tokyo.
    pub fn fetch_default(&self) -> Result<Vec<MailRecord>> {
        self.fetch(DEFAULT_SEARCH, DEFAULT_TIMEZONE)
    }

    /// Delete messages older than `days` days.
    pub fn delete(&self, days: u32) -> Result<DeleteResult> {
        let today = Local::now().date_naive();
        let mut sess = imap::connect(&self.cfg)?;
        with_session(&mut sess, &self.cfg.mailbox, |s| delete_with(s, today, days))
    }

    pub fn delete_default(&self) -> Result<DeleteResult> {
        self.delete(DEFAULT_DAYS)
    }
}

/// Select `mailbox`, run `op`, then close and log out whatever `op` returned.
///
/// If `op` fails its error wins and teardown failures are only logged.
pub fn with_session<M, R>(
    session: &mut M,
    mailbox: &str,
    op: impl FnOnce(&mut M) -> Result<R>,
) -> Result<R>
where
    M: Mailbox,
{
    let result = match session.select(mailbox) {
        Ok(()) => op(session),
        Err(e) => Err(e),
    };
    let released = release(session);

    match (result, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(teardown)) => {
            warn!(error = %teardown, "teardown failed after error");
            Err(e)
        }
    }
}

fn release<M: Mailbox>(session: &mut M) -> Result<()> {
    let closed = session.close();
    if let Err(e) = &closed {
        warn!(error = %e, "close failed");
    }
    let logged_out = session.logout();
    if let Err(e) = &logged_out {
        warn!(error = %e, "logout failed");
    }
    closed.and(logged_out)
}

/// UID SEARCH, then one RFC822 fetch per hit, in server order.
pub fn fetch_with<M: Mailbox>(session: &mut M, search: &str, tz: Tz) -> Result<Vec<MailRecord>> {
    let uids = match session.uid_search(search)? {
        SearchOutcome::Hits(uids) => uids,
        SearchOutcome::No => return Ok(Vec::new()),
    };
    info!(search, hits = uids.len(), "fetching messages");

    let mut records = Vec::with_capacity(uids.len());
    for uid in uids {
        debug!(uid, "fetch");
        let raw = session.uid_fetch_rfc822(uid)?;
        records.push(decode::decode_message(&uid.to_string(), &raw, tz)?);
    }
    Ok(records)
}

/// `BEFORE dd-Mon-yyyy` for the day `days` days before `today`.
pub fn imap_before_criterion(today: NaiveDate, days: u32) -> String {
    let cutoff = today
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN);
    cutoff.format("BEFORE %d-%b-%Y").to_string()
}

/// Flag every message older than the cutoff as `\Deleted`, then expunge.
pub fn delete_with<M: Mailbox>(session: &mut M, today: NaiveDate, days: u32) -> Result<DeleteResult> {
    let criteria = imap_before_criterion(today, days);
    let seqs = match session.search(&criteria)? {
        SearchOutcome::Hits(seqs) => seqs,
        SearchOutcome::No => return Ok(DeleteResult::default()),
    };

    let mut count = 0;
    for seq in seqs {
        session.mark_deleted(seq)?;
        count += 1;
    }
    session.expunge()?;

    info!(%criteria, count, "deleted messages");
    Ok(DeleteResult { count })
}
