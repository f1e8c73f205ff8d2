use chrono::NaiveDate;
use imapdict::mail::session::imap_before_criterion;
use imapdict::{delete_with, fetch_with, with_session, MailError, Mailbox, SearchOutcome};

const TOKYO: chrono_tz::Tz = chrono_tz::Asia::Tokyo;

struct Message {
    uid: u32,
    date: NaiveDate,
    seen: bool,
    deleted: bool,
    raw: Option<Vec<u8>>,
}

#[derive(Default)]
struct MemoryMailbox {
    messages: Vec<Message>,
    search_no: bool,
    search_fails: bool,
    close_fails: bool,
    select_fails: bool,
    selects: usize,
    closes: usize,
    logouts: usize,
}

impl MemoryMailbox {
    fn with(entries: &[(u32, (i32, u32, u32))]) -> Self {
        let messages = entries
            .iter()
            .map(|&(uid, (y, m, d))| Message {
                uid,
                date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
                seen: false,
                deleted: false,
                raw: None,
            })
            .collect();
        Self {
            messages,
            ..Self::default()
        }
    }

    fn replace_raw(&mut self, uid: u32, raw: &[u8]) {
        let message = self.messages.iter_mut().find(|m| m.uid == uid).unwrap();
        message.raw = Some(raw.to_vec());
    }

    fn raw(message: &Message) -> Vec<u8> {
        if let Some(raw) = &message.raw {
            return raw.clone();
        }
        format!(
            "Message-Id: <{uid}@example.com>\r\nSubject: message {uid}\r\nDate: {date}\r\n\r\nbody {uid}\r\n",
            uid = message.uid,
            date = message.date.format("%a, %d %b %Y 00:00:00 +0000"),
        )
        .into_bytes()
    }

    fn outcome(&self, hits: Vec<u32>) -> imapdict::mail::Result<SearchOutcome> {
        if self.search_fails {
            return Err(MailError::Imap(imap::error::Error::Bad("search exploded".into())));
        }
        if self.search_no {
            return Ok(SearchOutcome::No);
        }
        Ok(SearchOutcome::Hits(hits))
    }
}

impl Mailbox for MemoryMailbox {
    fn select(&mut self, _mailbox: &str) -> imapdict::mail::Result<()> {
        self.selects += 1;
        if self.select_fails {
            return Err(MailError::Imap(imap::error::Error::No("no such mailbox".into())));
        }
        Ok(())
    }

    fn uid_search(&mut self, criteria: &str) -> imapdict::mail::Result<SearchOutcome> {
        let hits = self
            .messages
            .iter()
            .filter(|m| criteria == "ALL" || (criteria == "UNSEEN" && !m.seen))
            .map(|m| m.uid)
            .collect();
        self.outcome(hits)
    }

    fn uid_fetch_rfc822(&mut self, uid: u32) -> imapdict::mail::Result<Vec<u8>> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.uid == uid)
            .ok_or(MailError::MissingBody(uid))?;
        message.seen = true;
        Ok(Self::raw(message))
    }

    fn search(&mut self, criteria: &str) -> imapdict::mail::Result<SearchOutcome> {
        let cutoff = criteria
            .strip_prefix("BEFORE ")
            .and_then(|d| NaiveDate::parse_from_str(d, "%d-%b-%Y").ok())
            .expect("only BEFORE searches are supported");
        let hits = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.date < cutoff)
            .map(|(i, _)| i as u32 + 1)
            .collect();
        self.outcome(hits)
    }

    fn mark_deleted(&mut self, seq: u32) -> imapdict::mail::Result<()> {
        self.messages[seq as usize - 1].deleted = true;
        Ok(())
    }

    fn expunge(&mut self) -> imapdict::mail::Result<()> {
        self.messages.retain(|m| !m.deleted);
        Ok(())
    }

    fn close(&mut self) -> imapdict::mail::Result<()> {
        self.closes += 1;
        if self.close_fails {
            return Err(MailError::Imap(imap::error::Error::Bad("close refused".into())));
        }
        Ok(())
    }

    fn logout(&mut self) -> imapdict::mail::Result<()> {
        self.logouts += 1;
        Ok(())
    }
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, 4).unwrap()
}

#[test]
fn fetch_keeps_server_order_and_releases_once() {
    let mut mb = MemoryMailbox::with(&[(5, (2024, 1, 1)), (2, (2024, 1, 2)), (9, (2024, 1, 3))]);

    let records = with_session(&mut mb, "INBOX", |m| fetch_with(m, "ALL", TOKYO)).unwrap();

    let uids: Vec<_> = records.iter().map(|r| r.uid.as_str()).collect();
    assert_eq!(uids, ["5", "2", "9"]);
    assert_eq!(records[0].subject, "message 5");
    assert_eq!(records[0].msg_id, "<5@example.com>");
    assert_eq!(records[0].date, "2024/01/01");
    assert_eq!(records[0].time, "09:00:00");
    assert_eq!(records[0].body.trim_end(), "body 5");
    assert_eq!((mb.selects, mb.closes, mb.logouts), (1, 1, 1));
}

#[test]
fn fetch_with_no_matches_is_empty() {
    let mut mb = MemoryMailbox::with(&[(1, (2024, 1, 1))]);

    let first = with_session(&mut mb, "INBOX", |m| fetch_with(m, "UNSEEN", TOKYO)).unwrap();
    assert_eq!(first.len(), 1);

    let second = with_session(&mut mb, "INBOX", |m| fetch_with(m, "UNSEEN", TOKYO)).unwrap();
    assert!(second.is_empty());
    assert_eq!((mb.closes, mb.logouts), (2, 2));
}

#[test]
fn search_no_status_is_not_an_error() {
    let mut mb = MemoryMailbox::with(&[(1, (2024, 1, 1))]);
    mb.search_no = true;

    let records = with_session(&mut mb, "INBOX", |m| fetch_with(m, "ALL", TOKYO)).unwrap();
    assert!(records.is_empty());

    let deleted = with_session(&mut mb, "INBOX", |m| delete_with(m, today(), 90)).unwrap();
    assert_eq!(deleted.count, 0);
    assert_eq!(mb.messages.len(), 1);
    assert_eq!((mb.closes, mb.logouts), (2, 2));
}

#[test]
fn failing_search_still_releases_session() {
    let mut mb = MemoryMailbox::with(&[(1, (2024, 1, 1))]);
    mb.search_fails = true;

    let err = with_session(&mut mb, "INBOX", |m| fetch_with(m, "ALL", TOKYO)).unwrap_err();
    assert!(matches!(err, MailError::Imap(_)));
    assert_eq!((mb.closes, mb.logouts), (1, 1));

    let err = with_session(&mut mb, "INBOX", |m| delete_with(m, today(), 90)).unwrap_err();
    assert!(matches!(err, MailError::Imap(_)));
    assert_eq!((mb.closes, mb.logouts), (2, 2));
}

#[test]
fn unparseable_message_does_not_sink_the_fetch() {
    let mut mb = MemoryMailbox::with(&[(1, (2024, 1, 1)), (2, (2024, 1, 2)), (3, (2024, 1, 3))]);
    mb.replace_raw(2, b" folded first\r\nSubject: x\r\n\r\nb");

    let records = with_session(&mut mb, "INBOX", |m| fetch_with(m, "ALL", TOKYO)).unwrap();

    assert_eq!(records.len(), 3);
    assert_eq!(records[0].subject, "message 1");
    assert_eq!(records[1].uid, "2");
    assert_eq!(records[1].format, "Unknown");
    assert_eq!(records[1].body, "Analysis failed.");
    assert_eq!(records[2].subject, "message 3");
    assert_eq!((mb.closes, mb.logouts), (1, 1));
}

#[test]
fn broken_attachment_fails_the_fetch_and_releases_once() {
    let mut mb = MemoryMailbox::with(&[(1, (2024, 1, 1)), (2, (2024, 1, 2))]);
    mb.replace_raw(
        2,
        b"Content-Type: multipart/mixed; boundary=\"mix\"\r\n\
\r\n\
--mix\r\n\
Content-Type: text/plain\r\n\
\r\n\
see attached\r\n\
--mix\r\n\
Content-Type: application/octet-stream; name=\"bad.bin\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
!!!\r\n\
--mix--\r\n",
    );

    let err = with_session(&mut mb, "INBOX", |m| fetch_with(m, "ALL", TOKYO)).unwrap_err();

    assert!(matches!(err, MailError::Attachment { .. }));
    assert_eq!((mb.selects, mb.closes, mb.logouts), (1, 1, 1));
}

#[test]
fn operation_error_wins_over_teardown_error() {
    let mut mb = MemoryMailbox::default();
    mb.close_fails = true;

    let err = with_session(&mut mb, "INBOX", |m| m.uid_fetch_rfc822(77)).unwrap_err();
    assert!(matches!(err, MailError::MissingBody(77)));
    assert_eq!((mb.closes, mb.logouts), (1, 1));
}

#[test]
fn teardown_error_surfaces_after_success() {
    let mut mb = MemoryMailbox::with(&[(1, (2024, 1, 1))]);
    mb.close_fails = true;

    let err = with_session(&mut mb, "INBOX", |m| fetch_with(m, "ALL", TOKYO)).unwrap_err();
    assert!(matches!(err, MailError::Imap(_)));
    assert_eq!(mb.logouts, 1);
}

#[test]
fn failed_select_skips_operation_but_logs_out() {
    let mut mb = MemoryMailbox::with(&[(1, (2024, 1, 1))]);
    mb.select_fails = true;

    let mut ran = false;
    let err = with_session(&mut mb, "Nope", |_| {
        ran = true;
        Ok(())
    })
    .unwrap_err();
    assert!(matches!(err, MailError::Imap(_)));
    assert!(!ran);
    assert_eq!((mb.closes, mb.logouts), (1, 1));
}

#[test]
fn delete_flags_messages_before_cutoff_then_nothing() {
    let mut mb = MemoryMailbox::with(&[
        (1, (2023, 12, 1)),
        (2, (2024, 1, 4)),
        (3, (2024, 1, 5)),
        (4, (2024, 3, 1)),
    ]);
    assert_eq!(imap_before_criterion(today(), 90), "BEFORE 05-Jan-2024");

    let deleted = with_session(&mut mb, "INBOX", |m| delete_with(m, today(), 90)).unwrap();
    assert_eq!(deleted.count, 2);
    let left: Vec<_> = mb.messages.iter().map(|m| m.uid).collect();
    assert_eq!(left, [3, 4]);

    let again = with_session(&mut mb, "INBOX", |m| delete_with(m, today(), 90)).unwrap();
    assert_eq!(again.count, 0);
    assert_eq!((mb.closes, mb.logouts), (2, 2));
}
