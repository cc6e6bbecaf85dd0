use super::{Issue, RepoSpec, Tracker};

use clap::{crate_name, crate_version};
use reqwest::blocking::Client;
use reqwest::header::*;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid GitHub API response: {res}")]
    API {
        res: String,
        #[source]
        e: serde_json::Error,
    },
    #[error("HTTP request error")]
    Request(#[from] reqwest::Error),
    #[error("Trying to construct invalid HTTP header")]
    Header(#[from] http::header::InvalidHeaderValue),
}

type Result<T, E = Error> = std::result::Result<T, E>;

// GitHub won't return more than 100 issues per page
const PER_PAGE: usize = 100;

#[derive(Debug, Clone)]
struct UrlFor {
    api: String,
}

impl UrlFor {
    fn new(api: &str) -> Self {
        Self {
            api: api.trim_end_matches('/').to_owned(),
        }
    }

    fn repo(&self, repo: &RepoSpec) -> String {
        format!("{}/repos/{}", self.api, repo)
    }

    fn issues(&self, repo: &RepoSpec) -> String {
        format!("{}/issues", self.repo(repo))
    }

    fn issue(&self, repo: &RepoSpec, number: u64) -> String {
        format!("{}/{}", self.issues(repo), number)
    }
}

#[derive(Debug, Clone)]
pub struct GitHub {
    client: Client,
    url_for: UrlFor,
}

impl GitHub {
    pub fn new(token: &str, api: &str, timeout: Duration) -> Result<Self> {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, format!("token {}", token.trim()).parse()?);
        h.insert(ACCEPT, "application/vnd.github.v3+json".parse()?);
        h.insert(
            USER_AGENT,
            format!("{}/{}", crate_name!(), crate_version!()).parse()?,
        );
        let client = Client::builder()
            .default_headers(h)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url_for: UrlFor::new(api),
        })
    }

    /// Verifies that the credentials grant access to `repo`
    pub fn check_repo(&self, repo: &RepoSpec) -> Result<()> {
        self.client
            .get(&self.url_for.repo(repo))
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn page(&self, repo: &RepoSpec, page: usize) -> Result<Vec<Issue>> {
        let res = self
            .client
            .get(&self.url_for.issues(repo))
            .query(&[
                ("state", "open".to_owned()),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ])
            .send()?
            .error_for_status()?
            .text()?;
        serde_json::from_str(&res).map_err(|e| Error::API { res, e })
    }

    fn list(&self, repo: &RepoSpec) -> Result<Vec<Issue>> {
        let mut iss = Vec::new();
        for page in 1.. {
            let chunk = self.page(repo, page)?;
            let len = chunk.len();
            debug!("{}: page {} with {} issues", repo, page, len);
            iss.extend(chunk.into_iter().filter(|i| i.pull_request.is_none()));
            if len < PER_PAGE {
                break;
            }
        }
        Ok(iss)
    }

    fn create(&self, repo: &RepoSpec, title: &str, body: &str) -> Result<Issue> {
        let res = self
            .client
            .post(&self.url_for.issues(repo))
            .json(&json!({
                "title": title,
                "body": body,
            }))
            .send()?
            .error_for_status()?
            .text()?;
        serde_json::from_str(&res).map_err(|e| Error::API { res, e })
    }

    fn retitle(&self, repo: &RepoSpec, number: u64, title: &str) -> Result<()> {
        self.client
            .patch(&self.url_for.issue(repo, number))
            .json(&json!({ "title": title }))
            .send()?
            .error_for_status()?;
        Ok(())
    }
}

impl Tracker for GitHub {
    fn open_issues(&self, repo: &RepoSpec) -> Result<Vec<Issue>, super::Error> {
        Ok(self.list(repo)?)
    }

    fn create_issue(&self, repo: &RepoSpec, title: &str, body: &str) -> Result<Issue, super::Error> {
        Ok(self.create(repo, title, body)?)
    }

    fn update_title(&self, repo: &RepoSpec, number: u64, title: &str) -> Result<(), super::Error> {
        Ok(self.retitle(repo, number, title)?)
    }

    fn name(&self) -> String {
        "GitHub".into()
    }
}
