use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, COOKIE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::models::{ChallengeDetail, ChallengeSummary, Envelope, UserConfig};

const CHALLENGES_PATH: &str = "/api/v1/challenges";

#[derive(Debug, Clone)]
pub enum Credentials {
    /// API access token, sent as `Authorization: Token <token>`.
    Token(String),
    /// Value of the `session` cookie from a logged-in browser.
    Cookie(String),
}

impl Credentials {
    pub fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        match self {
            Credentials::Token(token) => {
                let mut value = header_value(&format!("Token {}", token.trim()), "API token")?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
                // CTFd rejects token auth on requests without a JSON content type.
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            Credentials::Cookie(session) => {
                let mut value = header_value(&format!("session={}", session.trim()), "session cookie")?;
                value.set_sensitive(true);
                headers.insert(COOKIE, value);
            }
        }

        Ok(headers)
    }
}

fn header_value(raw: &str, what: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(raw)
        .map_err(|_| Error::Config(format!("{} contains characters not allowed in an HTTP header", what)))
}

/// The handful of calls the mirror needs from a CTFd instance.
pub trait CtfdApi {
    /// Base URL without a trailing slash.
    fn base_url(&self) -> &str;

    fn list_challenges(&self) -> Result<Vec<ChallengeSummary>>;

    fn challenge(&self, id: u64) -> Result<ChallengeDetail>;

    /// Streams the attachment at `file` into `dest`, returning bytes written.
    fn download(&self, file: &str, dest: &Path) -> Result<u64>;
}

pub struct CtfdClient {
    base: String,
    http: Client,
}

impl CtfdClient {
    pub fn new(url: &str, credentials: &Credentials, config: &UserConfig) -> Result<Self> {
        let base = normalize_base_url(url)?;

        let http = Client::builder()
            .default_headers(credentials.headers()?)
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .build()?;

        Ok(Self { base, http })
    }

    fn get_envelope<T: DeserializeOwned>(&self, url: &str) -> Result<Envelope<T>> {
        debug!("GET {}", url);
        let response = self.http.get(url).send()?;
        let response = check_status(url, response)?;
        let body = response.text()?;
        trace!("{} bytes from {}", body.len(), url);

        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|source| Error::Decode {
            url: url.to_string(),
            source,
        })?;

        if !envelope.success {
            return Err(Error::Api { url: url.to_string() });
        }
        Ok(envelope)
    }

    fn file_url(&self, file: &str) -> String {
        resolve_file_url(&self.base, file)
    }
}

impl CtfdApi for CtfdClient {
    fn base_url(&self) -> &str {
        &self.base
    }

    fn list_challenges(&self) -> Result<Vec<ChallengeSummary>> {
        let mut challenges = Vec::new();
        let mut url = format!("{}{}", self.base, CHALLENGES_PATH);
        let mut seen_pages = HashSet::from([1]);

        loop {
            let envelope: Envelope<Vec<ChallengeSummary>> = self.get_envelope(&url)?;
            if let Some(pagination) = envelope.pagination() {
                debug!(
                    "Challenge list page {}/{} ({} total)",
                    pagination.page.unwrap_or(1),
                    pagination.pages.unwrap_or(1),
                    pagination.total.unwrap_or(0)
                );
            }

            let next = envelope.next_page();
            let page = envelope.data.ok_or_else(|| Error::Api { url: url.clone() })?;
            challenges.extend(page);

            match next {
                Some(next) if seen_pages.insert(next) => {
                    url = format!("{}{}?page={}", self.base, CHALLENGES_PATH, next);
                }
                _ => break,
            }
        }

        Ok(challenges)
    }

    fn challenge(&self, id: u64) -> Result<ChallengeDetail> {
        let url = format!("{}{}/{}", self.base, CHALLENGES_PATH, id);
        let envelope: Envelope<ChallengeDetail> = self.get_envelope(&url)?;
        envelope.data.ok_or(Error::Api { url })
    }

    fn download(&self, file: &str, dest: &Path) -> Result<u64> {
        let url = self.file_url(file);
        debug!("GET {} -> {}", url, dest.display());

        let response = self.http.get(&url).send()?;
        let mut response = check_status(&url, response)?;

        let part = part_path(dest);
        let written = write_part(&mut response, &part, dest);
        if written.is_err() {
            let _ = fs::remove_file(&part);
        }
        written
    }
}

fn check_status(url: &str, response: Response) -> Result<Response> {
    if response.status() != StatusCode::OK {
        return Err(Error::Status {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    Ok(response)
}

fn write_part(response: &mut Response, part: &Path, dest: &Path) -> Result<u64> {
    let mut file = File::create(part)?;
    let written = response.copy_to(&mut file)?;
    file.flush()?;
    drop(file);

    fs::rename(part, dest)?;
    Ok(written)
}

pub fn part_path(dest: &Path) -> PathBuf {
    let mut part = dest.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

pub fn normalize_base_url(url: &str) -> Result<String> {
    let trimmed = url.trim().trim_end_matches('/');

    let parsed = Url::parse(trimmed).map_err(|e| Error::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::InvalidUrl {
            url: url.to_string(),
            reason: "expected an http:// or https:// URL".to_string(),
        });
    }

    Ok(trimmed.to_string())
}

/// CTFd hands out attachment links relative to the instance root, but
/// externally hosted files come back as absolute URLs.
pub fn resolve_file_url(base: &str, file: &str) -> String {
    if file.starts_with("http://") || file.starts_with("https://") {
        return file.to_string();
    }

    if file.starts_with('/') {
        format!("{}{}", base, file)
    } else {
        format!("{}/{}", base, file)
    }
}
