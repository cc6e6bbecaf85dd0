#[macro_use]
extern crate log;

mod config;
mod counter;
mod event;
mod issuer;
mod locks;
mod matcher;
mod pubsub;
mod ticket;
mod tracker;

use crate::config::{Config, Settings};
use crate::event::Event;
use crate::issuer::{Issuer, Outcome};
use crate::ticket::Ticket;
use crate::tracker::{DryRun, GitHub, Tracker};

use anyhow::{bail, Context, Error};
use colored::*;
use env_logger::Env;
use rayon::prelude::*;
use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use structopt::StructOpt;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    rename_all = "kebab",
    after_help = "\
    All options may be given in a .env file as well.
    Set RUST_LOG=prod2issue=debug in the environment to get full logging output.
    "
)]
pub struct Opt {
    /// GitHub access token
    #[structopt(short, long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,
    /// Account which owns the target repositories
    #[structopt(short, long, global = true, env = "GITHUB_OWNER", value_name = "USER")]
    owner: Option<String>,
    /// Deployment stage prefixed to issue titles, e.g. "prod" or "staging"
    #[structopt(short, long, global = true, env = "ENV_TYPE", value_name = "TAG")]
    env_type: Option<String>,
    /// Service to repository mapping
    ///
    /// Format: [{"serviceName": "billing", "repo": "billing-api"}, ...]. Repositories without
    /// "OWNER/" prefix belong to --owner.
    #[structopt(short, long, global = true, env = "GITHUB_SERVICES", value_name = "JSON")]
    services: Option<String>,
    /// Repository for events which carry no service label
    #[structopt(short, long, global = true, env = "DEFAULT_REPO", value_name = "REPO")]
    default_repo: Option<String>,
    /// GitHub API base URL
    #[structopt(
        long,
        global = true,
        env = "GITHUB_API_URL",
        default_value = "https://api.github.com"
    )]
    api_url: String,
    /// Timeout for GitHub API requests
    #[structopt(
        long,
        global = true,
        env = "GITHUB_TIMEOUT",
        value_name = "SECS",
        default_value = "30"
    )]
    timeout: u64,
    #[structopt(subcommand)]
    command: Cmd,
}

#[derive(Debug, Clone, StructOpt)]
pub enum Cmd {
    /// Files issues for error events. Every input file holds exactly one event.
    Process(Process),
    /// Shows issue title and body for an event without contacting GitHub.
    Render(Render),
    /// Verifies credentials and access to all configured repositories.
    Check,
}

#[derive(Debug, Clone, StructOpt, Default)]
pub struct Process {
    /// Unwrap Pub/Sub message envelopes (base64 encoded "data")
    #[structopt(short, long)]
    pubsub: bool,
    /// Look up existing issues but don't create or modify anything
    #[structopt(short = "n", long)]
    dry_run: bool,
    /// Number of events processed in parallel
    #[structopt(short, long, value_name = "N", default_value = "1")]
    jobs: usize,
    /// Event files. Reads a single event from stdin if none given or "-".
    #[structopt(value_name = "FILE", parse(from_os_str))]
    files: Vec<PathBuf>,
}

#[derive(Debug, Clone, StructOpt, Default)]
pub struct Render {
    /// Unwrap Pub/Sub message envelope
    #[structopt(short, long)]
    pubsub: bool,
    /// Event file (default: stdin)
    #[structopt(value_name = "FILE", parse(from_os_str))]
    file: Option<PathBuf>,
}

/// Where a single message comes from
#[derive(Debug, Clone, PartialEq)]
enum Source {
    Stdin,
    File(PathBuf),
}

impl Source {
    fn new(path: Option<&Path>) -> Self {
        match path {
            Some(p) if p != Path::new("-") => Source::File(p.to_owned()),
            _ => Source::Stdin,
        }
    }

    fn list(files: &[PathBuf]) -> Vec<Self> {
        if files.is_empty() {
            vec![Source::Stdin]
        } else {
            files.iter().map(|f| Self::new(Some(f))).collect()
        }
    }

    fn read(&self) -> Result<Vec<u8>> {
        match self {
            Source::Stdin => {
                let mut buf = Vec::new();
                io::stdin()
                    .read_to_end(&mut buf)
                    .context("Cannot read event from stdin")?;
                Ok(buf)
            }
            Source::File(p) => {
                fs::read(p).with_context(|| format!("Cannot read event from {}", p.display()))
            }
        }
    }

    /// Message payload, optionally unwrapped from its Pub/Sub envelope
    fn payload(&self, pubsub: bool) -> Result<Vec<u8>> {
        let raw = self.read()?;
        if !pubsub {
            return Ok(raw);
        }
        let d = pubsub::unwrap(&raw).with_context(|| format!("Cannot unwrap message {}", self))?;
        if let Some(id) = &d.id {
            debug!("{}: Pub/Sub message {}", self, id);
        }
        Ok(d.payload)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Stdin => write!(f, "<stdin>"),
            Source::File(p) => write!(f, "{}", p.display()),
        }
    }
}

fn config(opt: &Opt) -> Result<Config> {
    Config::new(Settings {
        token: opt.github_token.clone(),
        owner: opt.owner.clone(),
        env_tag: opt.env_type.clone(),
        services: opt.services.clone(),
        default_repo: opt.default_repo.clone(),
        api_url: opt.api_url.clone(),
        timeout: Duration::from_secs(opt.timeout),
    })
    .context("Invalid configuration")
}

fn github(cfg: &Config) -> Result<GitHub> {
    GitHub::new(&cfg.token, &cfg.api_url, cfg.timeout).context("Cannot set up GitHub client")
}

fn handle(iss: &Issuer, src: &Source, pubsub: bool) -> Result<Outcome> {
    let payload = src.payload(pubsub)?;
    Ok(iss.handle(&payload)?)
}

/// Handles all sources on a pool of `jobs` threads. Results are returned in input order.
fn handle_all(
    iss: &Issuer,
    sources: &[Source],
    pubsub: bool,
    jobs: usize,
) -> Result<Vec<Result<Outcome>>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()
        .context("Cannot start worker threads")?;
    Ok(pool.install(|| {
        sources
            .par_iter()
            .map(|src| handle(iss, src, pubsub))
            .collect()
    }))
}

fn report(src: &Source, err: &Error) {
    error!("{}: {}", src.to_string().yellow(), err);
    for e in err.chain().skip(1) {
        error!("  caused by: {}", e);
        // reqwest seems to fold all causes into its head error
        if e.downcast_ref::<reqwest::Error>().is_some() {
            break;
        }
    }
}

fn process(opt: &Opt, p: &Process) -> Result<()> {
    let cfg = config(opt)?;
    let gh = github(&cfg)?;
    let tracker: Box<dyn Tracker> = if p.dry_run {
        Box::new(DryRun::new(gh))
    } else {
        Box::new(gh)
    };
    info!(
        "Filing issues via {} for {} services",
        tracker.name(),
        cfg.services.len()
    );
    let iss = Issuer::new(&cfg, tracker.as_ref());
    let sources = Source::list(&p.files);
    let results = handle_all(&iss, &sources, p.pubsub, p.jobs)?;
    let mut failed = 0;
    for (src, res) in sources.iter().zip(results) {
        match res {
            Ok(out) => println!("{}: {}", src, out),
            Err(e) => {
                failed += 1;
                report(src, &e);
            }
        }
    }
    if failed > 0 {
        bail!("{} of {} events failed", failed, sources.len());
    }
    Ok(())
}

fn render(opt: &Opt, r: &Render) -> Result<()> {
    let env_tag = match &opt.env_type {
        Some(t) if !t.trim().is_empty() => t,
        _ => bail!("No deployment stage given either as option or via the ENV_TYPE environment variable"),
    };
    let payload = Source::new(r.file.as_deref()).payload(r.pubsub)?;
    let tkt = Ticket::new(&Event::parse(&payload), env_tag);
    if let Some(service) = &tkt.service {
        info!("service: {}", service.yellow());
    }
    println!("{:#}", tkt);
    Ok(())
}

fn check(opt: &Opt) -> Result<()> {
    let cfg = config(opt)?;
    let gh = github(&cfg)?;
    let mut repos = cfg.services.repos();
    if let Some(d) = &cfg.default_repo {
        if !repos.contains(&d) {
            repos.push(d);
        }
    }
    info!(
        "Checking access to {} repositories as owner {}",
        repos.len(),
        cfg.owner.yellow()
    );
    for repo in repos {
        gh.check_repo(repo)
            .with_context(|| format!("Cannot access repository {}", repo))?;
        info!("{}: {}", repo.to_string().yellow(), "ok".green());
    }
    Ok(())
}

fn run() -> Result<()> {
    dotenv::dotenv().ok();
    let opt = Opt::from_args();
    match opt.command {
        Cmd::Process(ref p) => process(&opt, p),
        Cmd::Render(ref r) => render(&opt, r),
        Cmd::Check => check(&opt),
    }
}

fn main() {
    env_logger::from_env(Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        for e in err.chain() {
            error!("{}", e);
            if e.downcast_ref::<reqwest::Error>().is_some() {
                break;
            }
        }
        std::process::exit(1);
    }
}

// === Tests ===
