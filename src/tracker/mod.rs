mod dry_run;
mod github;

pub use dry_run::DryRun;
pub use github::GitHub;

use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    GitHub(#[from] github::Error),
    #[error("Repository specification must be in the format <OWNER>/<REPO> or <REPO>")]
    RepoFormat,
    #[cfg(test)]
    #[error("Connection to issue tracker lost")]
    Offline,
}

/// Individual issue as returned by the tracker's open issue listing
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Issue {
    #[serde(default)]
    pub id: u64,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html_url: String,
    /// Present if GitHub returns a pull request in the issue listing
    #[serde(default)]
    pub pull_request: Option<Value>,
}

pub trait Tracker: Send + Sync {
    /// Returns the complete set of open issues in `repo`, in the tracker's native order
    fn open_issues(&self, repo: &RepoSpec) -> Result<Vec<Issue>, Error>;

    /// Creates a new issue and returns it as stored by the tracker
    fn create_issue(&self, repo: &RepoSpec, title: &str, body: &str) -> Result<Issue, Error>;

    /// Changes only the title of an existing issue
    fn update_title(&self, repo: &RepoSpec, number: u64, title: &str) -> Result<(), Error>;

    fn name(&self) -> String;
}

/// Fully qualified repository: owning account plus repository name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoSpec {
    owner: String,
    repo: String,
}

impl RepoSpec {
    pub fn new<S: Into<String>, T: Into<String>>(owner: S, repo: T) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Qualifies a bare repository name with `owner`. Names which already contain an owner are
    /// parsed as-is.
    pub fn with_owner(owner: &str, name: &str) -> Result<Self, Error> {
        if name.contains('/') {
            return name.parse();
        }
        if owner.is_empty() || name.is_empty() {
            return Err(Error::RepoFormat);
        }
        Ok(Self::new(owner, name))
    }
}

impl FromStr for RepoSpec {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut elem = s.split('/');
        let owner = elem.next().ok_or(Error::RepoFormat)?.to_owned();
        let repo = elem.next().ok_or(Error::RepoFormat)?.to_owned();
        if owner.is_empty() || repo.is_empty() || elem.next().is_some() {
            Err(Error::RepoFormat)
        } else {
            Ok(Self { owner, repo })
        }
    }
}

impl fmt::Display for RepoSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}
