//! Startup configuration and service → repository routing.

use crate::tracker::{self, RepoSpec};

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),
    #[error("Cannot parse service list (expected JSON like [{{\"serviceName\": \"...\", \"repo\": \"...\"}}])")]
    Services(#[source] serde_json::Error),
    #[error("Service list is empty")]
    NoServices,
    #[error("Duplicate service {0} in service list")]
    DuplicateService(String),
    #[error("Invalid repository '{repo}'")]
    Repo {
        repo: String,
        #[source]
        e: tracker::Error,
    },
}

#[derive(Debug, Error)]
#[error("No repository configured for service {}", service_label(.0))]
pub struct UnknownService(pub Option<String>);

fn service_label(s: &Option<String>) -> String {
    match s {
        Some(s) => format!("'{}'", s),
        None => "<none>".to_owned(),
    }
}

/// One entry of the service list
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Service {
    service_name: String,
    repo: String,
}

/// Read-only routing table from service identifiers to repositories
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceMap(HashMap<String, RepoSpec>);

impl ServiceMap {
    /// Parses a JSON service list. Bare repository names are qualified with `owner`.
    pub fn from_json(json: &str, owner: &str) -> Result<Self, ConfigError> {
        let list: Vec<Service> = serde_json::from_str(json).map_err(ConfigError::Services)?;
        if list.is_empty() {
            return Err(ConfigError::NoServices);
        }
        let mut map = HashMap::with_capacity(list.len());
        for s in list {
            let repo = RepoSpec::with_owner(owner, &s.repo).map_err(|e| ConfigError::Repo {
                repo: s.repo.clone(),
                e,
            })?;
            if map.insert(s.service_name.clone(), repo).is_some() {
                return Err(ConfigError::DuplicateService(s.service_name));
            }
        }
        Ok(Self(map))
    }

    /// Looks up the repository for `service`. Events without service label go to `default`.
    ///
    /// Lookup is exact: no case folding or whitespace trimming is applied.
    pub fn resolve<'a>(
        &'a self,
        service: Option<&str>,
        default: Option<&'a RepoSpec>,
    ) -> Result<&'a RepoSpec, UnknownService> {
        match service {
            Some(s) => self.0.get(s).ok_or_else(|| UnknownService(Some(s.to_owned()))),
            None => default.ok_or(UnknownService(None)),
        }
    }

    /// All distinct repositories, sorted
    pub fn repos(&self) -> Vec<&RepoSpec> {
        let mut r: Vec<&RepoSpec> = self.0.values().collect();
        r.sort_by_key(|r| r.to_string());
        r.dedup();
        r
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub owner: String,
    /// Deployment stage label which prefixes issue titles, e.g. "prod"
    pub env_tag: String,
    pub services: ServiceMap,
    /// Target for events that carry no service label
    pub default_repo: Option<RepoSpec>,
    pub api_url: String,
    pub timeout: Duration,
}

/// Raw settings as collected from command line and environment
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub token: Option<String>,
    pub owner: Option<String>,
    pub env_tag: Option<String>,
    pub services: Option<String>,
    pub default_repo: Option<String>,
    pub api_url: String,
    pub timeout: Duration,
}

fn required(val: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    match val {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

impl Config {
    /// Validates all settings. Any missing piece is fatal.
    pub fn new(s: Settings) -> Result<Self, ConfigError> {
        let token = required(s.token, "GITHUB_TOKEN")?;
        let owner = required(s.owner, "GITHUB_OWNER")?;
        let env_tag = required(s.env_tag, "ENV_TYPE")?;
        let services = ServiceMap::from_json(&required(s.services, "GITHUB_SERVICES")?, &owner)?;
        let default_repo = match s.default_repo.filter(|r| !r.trim().is_empty()) {
            Some(r) => Some(
                RepoSpec::with_owner(&owner, &r).map_err(|e| ConfigError::Repo { repo: r, e })?,
            ),
            None => None,
        };
        Ok(Self {
            token,
            owner,
            env_tag,
            services,
            default_repo,
            api_url: s.api_url,
            timeout: s.timeout,
        })
    }

    /// Repository for an event with the given service label
    pub fn repo_for(&self, service: Option<&str>) -> Result<&RepoSpec, UnknownService> {
        self.services.resolve(service, self.default_repo.as_ref())
    }
}

// === Tests ===
