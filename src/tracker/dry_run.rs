//! Read-only tracker wrapper: looks up issues for real but only logs writes.

use super::{Issue, RepoSpec, Tracker};

use colored::*;

pub struct DryRun<T> {
    inner: T,
}

impl<T: Tracker> DryRun<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

impl<T: Tracker> Tracker for DryRun<T> {
    fn open_issues(&self, repo: &RepoSpec) -> Result<Vec<Issue>, super::Error> {
        self.inner.open_issues(repo)
    }

    fn create_issue(&self, repo: &RepoSpec, title: &str, body: &str) -> Result<Issue, super::Error> {
        info!("{}: would create '{}'", repo, title.yellow());
        Ok(Issue {
            title: title.to_owned(),
            body: Some(body.to_owned()),
            ..Issue::default()
        })
    }

    fn update_title(&self, repo: &RepoSpec, number: u64, title: &str) -> Result<(), super::Error> {
        info!("{}: would retitle #{} to '{}'", repo, number, title.yellow());
        Ok(())
    }

    fn name(&self) -> String {
        format!("{} (dry run)", self.inner.name())
    }
}
