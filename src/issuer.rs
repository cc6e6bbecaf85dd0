//! Turns one error event into a new or bumped issue.
//!
//! Per message: parse → format → resolve repository → look for an open duplicate → either
//! increment the duplicate's counter or publish a new issue with counter 1. Each message is
//! handled independently and every failure is final for that message.

use crate::config::{Config, UnknownService};
use crate::counter::{self, CounterError};
use crate::event::Event;
use crate::locks::TitleLocks;
use crate::matcher;
use crate::ticket::Ticket;
use crate::tracker::{self, RepoSpec, Tracker};

use colored::*;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    UnknownService(#[from] UnknownService),
    #[error("Refusing to touch issue #{number}")]
    MalformedCounter {
        number: u64,
        #[source]
        e: CounterError,
    },
    #[error("Issue tracker unavailable")]
    TrackerUnavailable(#[from] tracker::Error),
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Terminal state of a successfully handled message
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// No open duplicate existed
    Created {
        repo: RepoSpec,
        number: u64,
        title: String,
    },
    /// Counter of an existing issue was bumped
    Updated {
        repo: RepoSpec,
        number: u64,
        title: String,
    },
}

impl Outcome {
    pub fn title(&self) -> &str {
        match self {
            Outcome::Created { title, .. } | Outcome::Updated { title, .. } => title,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Created {
                repo,
                number,
                title,
            } => write!(f, "created {}#{} '{}'", repo, number, title),
            Outcome::Updated {
                repo,
                number,
                title,
            } => write!(f, "updated {}#{} '{}'", repo, number, title),
        }
    }
}

pub struct Issuer<'a> {
    cfg: &'a Config,
    tracker: &'a dyn Tracker,
    locks: TitleLocks,
}

impl<'a> Issuer<'a> {
    pub fn new(cfg: &'a Config, tracker: &'a dyn Tracker) -> Self {
        Self {
            cfg,
            tracker,
            locks: TitleLocks::default(),
        }
    }

    /// Handles a single raw message payload
    pub fn handle(&self, payload: &[u8]) -> Result<Outcome> {
        let event = Event::parse(payload);
        if let Event::Error(rec) = &event {
            debug!(
                "event {} ({}) from service {}",
                rec.insert_id.as_deref().unwrap_or("-"),
                rec.severity.as_deref().unwrap_or("DEFAULT"),
                rec.service_id.as_deref().unwrap_or("-")
            );
        }
        let ticket = Ticket::new(&event, &self.cfg.env_tag);
        let repo = self.cfg.repo_for(ticket.service.as_deref())?;
        debug!("{}: routed '{}' to {}", self.tracker.name(), ticket.title, repo);
        self.locks
            .with(repo, &ticket.title, || self.file(repo, &ticket))
    }

    fn file(&self, repo: &RepoSpec, tkt: &Ticket) -> Result<Outcome> {
        let open = self.tracker.open_issues(repo)?;
        match matcher::find_duplicate(&open, &tkt.title) {
            Some(dup) => {
                let title = counter::increment(&dup.title).map_err(|e| Error::MalformedCounter {
                    number: dup.number,
                    e,
                })?;
                self.tracker.update_title(repo, dup.number, &title)?;
                info!("{}: #{} {}", repo, dup.number, title.yellow());
                Ok(Outcome::Updated {
                    repo: repo.clone(),
                    number: dup.number,
                    title,
                })
            }
            None => self.publish(repo, tkt),
        }
    }

    fn publish(&self, repo: &RepoSpec, tkt: &Ticket) -> Result<Outcome> {
        let title = counter::with_counter(tkt.title.as_str(), 1);
        let created = self.tracker.create_issue(repo, &title, &tkt.body)?;
        info!(
            "{}: #{} {} (new) {}",
            repo,
            created.number,
            title.green(),
            created.html_url
        );
        Ok(Outcome::Created {
            repo: repo.clone(),
            number: created.number,
            title,
        })
    }
}

// === Tests ===

#[cfg(test)]
mod test {
    use super::*;
    use crate::tests::{billing, config, error_payload, Memory};
    use assert_matches::assert_matches;
    use rayon::prelude::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn first_occurrence_creates_then_bumps() {
        let cfg = config(None);
        let mem = Memory::new();
        let iss = Issuer::new(&cfg, &mem);
        let payload = error_payload("boom", "billing");

        let out = iss.handle(&payload).unwrap();
        assert_eq!(
            out,
            Outcome::Created {
                repo: billing(),
                number: 1,
                title: "prod err: boom (1)".into()
            }
        );
        let out = iss.handle(&payload).unwrap();
        assert_eq!(
            out,
            Outcome::Updated {
                repo: billing(),
                number: 1,
                title: "prod err: boom (2)".into()
            }
        );
        assert_eq!(mem.creates.load(Ordering::SeqCst), 1);
        assert_eq!(mem.updates.load(Ordering::SeqCst), 1);
        assert_eq!(mem.titles(&billing()), vec!["prod err: boom (2)"]);
    }

    #[test]
    fn nth_occurrence_has_counter_n() {
        let cfg = config(None);
        let mem = Memory::new();
        let iss = Issuer::new(&cfg, &mem);
        for n in 1..=12 {
            let out = iss.handle(&error_payload("boom", "billing")).unwrap();
            assert_eq!(out.title(), format!("prod err: boom ({})", n));
        }
        assert_eq!(mem.issues(&billing()).len(), 1);
    }

    #[test]
    fn update_keeps_body() {
        let cfg = config(None);
        let mem = Memory::with_issues(&billing(), &["prod err: boom (41)"]);
        let iss = Issuer::new(&cfg, &mem);
        iss.handle(&error_payload("boom", "billing")).unwrap();
        let issues = mem.issues(&billing());
        assert_eq!(issues[0].title, "prod err: boom (42)");
        assert_eq!(issues[0].body.as_deref(), Some("body of #1"));
    }

    #[test]
    fn different_messages_are_distinct_issues() {
        let cfg = config(None);
        let mem = Memory::with_issues(&billing(), &["prod err: boom again (3)"]);
        let iss = Issuer::new(&cfg, &mem);
        iss.handle(&error_payload("boom", "billing")).unwrap();
        iss.handle(&error_payload("bang", "billing")).unwrap();
        assert_eq!(
            mem.titles(&billing()),
            vec![
                "prod err: boom again (3)",
                "prod err: boom (1)",
                "prod err: bang (1)"
            ]
        );
    }

    #[test]
    fn same_message_other_service_goes_elsewhere() {
        let cfg = config(None);
        let mem = Memory::new();
        let iss = Issuer::new(&cfg, &mem);
        iss.handle(&error_payload("boom", "billing")).unwrap();
        let out = iss.handle(&error_payload("boom", "shop")).unwrap();
        assert_matches!(out, Outcome::Created { ref repo, .. } if repo == &RepoSpec::new("acme", "shop"));
    }

    #[test]
    fn first_of_several_duplicates_wins() {
        let cfg = config(None);
        let mem = Memory::with_issues(&billing(), &["prod err: boom (7)", "prod err: boom (2)"]);
        let iss = Issuer::new(&cfg, &mem);
        let out = iss.handle(&error_payload("boom", "billing")).unwrap();
        assert_eq!(out.title(), "prod err: boom (8)");
        assert_eq!(
            mem.titles(&billing()),
            vec!["prod err: boom (8)", "prod err: boom (2)"]
        );
    }

    #[test]
    fn raw_payload_uses_default_repo() {
        let cfg = config(Some("ops"));
        let mem = Memory::new();
        let iss = Issuer::new(&cfg, &mem);
        let out = iss.handle(b"segfault at 0x0").unwrap();
        let ops = RepoSpec::new("acme", "ops");
        assert_eq!(
            out,
            Outcome::Created {
                repo: ops.clone(),
                number: 1,
                title: "Production error (1)".into()
            }
        );
        assert_eq!(mem.issues(&ops)[0].body.as_deref(), Some("segfault at 0x0"));
        let out = iss.handle(b"another unrelated crash").unwrap();
        assert_eq!(out.title(), "Production error (2)");
    }

    #[test]
    fn empty_service_label_uses_default_repo() {
        let cfg = config(Some("ops"));
        let mem = Memory::new();
        let iss = Issuer::new(&cfg, &mem);
        let payload = br#"{"jsonPayload":{"Error":"boom"},"resource":{"labels":{"service_name":""}}}"#;
        assert_eq!(
            iss.handle(payload).unwrap(),
            Outcome::Created {
                repo: RepoSpec::new("acme", "ops"),
                number: 1,
                title: "prod err: boom (1)".into()
            }
        );
        assert!(mem.issues(&billing()).is_empty());
    }

    #[test]
    fn raw_payload_without_default_repo() {
        let cfg = config(None);
        let mem = Memory::new();
        let iss = Issuer::new(&cfg, &mem);
        assert_matches!(
            iss.handle(b"not json"),
            Err(Error::UnknownService(UnknownService(None)))
        );
        assert_eq!(mem.creates.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_service_is_fatal() {
        let cfg = config(Some("ops"));
        let mem = Memory::new();
        let iss = Issuer::new(&cfg, &mem);
        assert_matches!(
            iss.handle(&error_payload("boom", "Billing")),
            Err(Error::UnknownService(UnknownService(Some(ref s)))) if s == "Billing"
        );
        assert_eq!(mem.creates.load(Ordering::SeqCst), 0);
        assert!(mem.issues(&RepoSpec::new("acme", "ops")).is_empty());
    }

    #[test]
    fn counter_overflow_aborts() {
        let cfg = config(None);
        let title = format!("prod err: boom ({})", u64::MAX);
        let mem = Memory::with_issues(&billing(), &[title.as_str()]);
        let iss = Issuer::new(&cfg, &mem);
        assert_matches!(
            iss.handle(&error_payload("boom", "billing")),
            Err(Error::MalformedCounter { number: 1, .. })
        );
        assert_eq!(mem.titles(&billing()), vec![title]);
        assert_eq!(mem.creates.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn tracker_failure() {
        let cfg = config(None);
        let mem = Memory::new();
        mem.broken.store(true, Ordering::SeqCst);
        let iss = Issuer::new(&cfg, &mem);
        assert_matches!(
            iss.handle(&error_payload("boom", "billing")),
            Err(Error::TrackerUnavailable(tracker::Error::Offline))
        );
        assert_eq!(mem.creates.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_identical_messages_count_exactly() {
        let cfg = config(None);
        let mem = Memory::new();
        let iss = Issuer::new(&cfg, &mem);
        let payload = error_payload("boom", "billing");
        let res: Vec<_> = (0..32)
            .into_par_iter()
            .map(|_| iss.handle(&payload))
            .collect();
        assert!(res.iter().all(|r| r.is_ok()));
        assert_eq!(mem.titles(&billing()), vec!["prod err: boom (32)"]);
        assert_eq!(mem.creates.load(Ordering::SeqCst), 1);
    }
}
