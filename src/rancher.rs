//! Client for the Rancher cluster API.
//!
//! The API exposes collection endpoints returning `{"data": [...]}` bodies
//! behind HTTP Basic auth. Discovery walks `/projects` and then
//! `/projects/{id}/services` for each project, sequentially, so one cycle
//! issues O(projects) requests.

use std::time::Duration;

use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use slog::{debug, info, Logger};
use thiserror::Error;
use url::Url;

const USER_AGENT: &str = concat!("rancher-prom-sd/", env!("CARGO_PKG_VERSION"));

/// Path probed once at startup to validate the configured credentials.
const TOKEN_PATH: &str = "token";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Credentials were rejected. Never retried; the operator has to fix the
    /// configured keys.
    #[error("authentication rejected by {url} (challenge: {})", .challenge.as_deref().unwrap_or("none"))]
    Auth {
        url: Url,
        /// Contents of the `WWW-Authenticate` header, if the server sent one.
        challenge: Option<String>,
    },

    /// The server could not fulfill the request but a later cycle may
    /// succeed.
    #[error("server returned {status}: {reason}")]
    Transient { status: StatusCode, reason: String },

    /// We failed to reach the server at all (DNS, refused, timeout).
    #[error("failed to reach the server: {0}")]
    Network(reqwest::Error),

    #[error("giving up after {attempts} consecutive failed discovery cycles")]
    RetriesExhausted { attempts: u32 },
}

/// API credentials, read from the environment once at startup and immutable
/// for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct RancherCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub base_url: Url,
}

impl RancherCredentials {
    /// Reads `RANCHER_ACCESS_KEY`, `RANCHER_SECRET_KEY` and `RANCHER_URL`.
    /// A missing variable is a configuration error, reported before any
    /// network call is made.
    pub fn from_env() -> anyhow::Result<Self> {
        let get = |name: &str| {
            std::env::var(name).map_err(|_| {
                anyhow::anyhow!(
                    "please set the environment variables \
                     RANCHER_ACCESS_KEY, RANCHER_SECRET_KEY and RANCHER_URL \
                     ({} is missing)",
                    name
                )
            })
        };
        let access_key = get("RANCHER_ACCESS_KEY")?;
        let secret_key = get("RANCHER_SECRET_KEY")?;
        let base_url = Url::parse(&get("RANCHER_URL")?)
            .map_err(|e| anyhow::anyhow!("RANCHER_URL is not a valid URL: {}", e))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("RANCHER_URL must be an absolute http(s) URL");
        }
        Ok(Self {
            access_key,
            secret_key,
            base_url,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub name: String,
    /// Absent or `null` for services without any exposed ports.
    #[serde(default)]
    pub public_endpoints: Option<Vec<PublicEndpoint>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicEndpoint {
    pub ip_address: String,
    pub port: u16,
}

/// A service together with the project it was found in.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredService {
    pub project: Project,
    pub service: Service,
}

/// Collection responses wrap their payload in a `data` array.
#[derive(Debug, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

/// Credential handle presented on every API call. Holds the HTTP client so
/// that no request can be issued without the configured Basic auth attached.
pub struct AuthContext {
    log: Logger,
    client: Client,
    credentials: RancherCredentials,
}

/// Performs one authenticated exchange against the token endpoint and, on
/// success, returns the context all subsequent calls go through.
///
/// Rejected credentials surface as [`DiscoveryError::Auth`]; the caller must
/// not retry those.
pub async fn authenticate(
    log: Logger,
    credentials: RancherCredentials,
    request_timeout: Duration,
) -> Result<AuthContext, DiscoveryError> {
    let client = Client::builder()
        .timeout(request_timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(DiscoveryError::Network)?;
    let ctx = AuthContext {
        log,
        client,
        credentials,
    };
    ctx.get(TOKEN_PATH).await?;
    info!(ctx.log, "Authenticated"; "api" => %ctx.credentials.base_url);
    Ok(ctx)
}

impl AuthContext {
    /// Fetches all services across all projects, preserving project iteration
    /// order and service order within each project.
    ///
    /// All-or-nothing: the first failing sub-request fails the whole call so
    /// that a half-populated document is never published.
    pub async fn list_services(&self) -> Result<Vec<DiscoveredService>, DiscoveryError> {
        let projects: Collection<Project> = self.get_json("projects").await?;
        let mut services = Vec::new();
        for project in projects.data {
            let in_project: Collection<Service> = self
                .get_json(&format!("projects/{}/services", project.id))
                .await?;
            debug!(
                self.log,
                "Fetched services";
                "project" => project.name.as_str(),
                "project_id" => project.id.as_str(),
                "count" => in_project.data.len()
            );
            services.extend(in_project.data.into_iter().map(|service| DiscoveredService {
                project: project.clone(),
                service,
            }));
        }
        Ok(services)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, DiscoveryError> {
        let response = self.get(path).await?;
        let status = response.status();
        response
            .json()
            .await
            .map_err(|e| DiscoveryError::Transient {
                status,
                reason: format!("invalid JSON payload: {}", e),
            })
    }

    /// Issues one GET with Basic auth and classifies the outcome.
    async fn get(&self, path: &str) -> Result<Response, DiscoveryError> {
        let url = self.endpoint_url(path);
        let response = self
            .client
            .get(url.clone())
            .basic_auth(&self.credentials.access_key, Some(&self.credentials.secret_key))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(DiscoveryError::Network)?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(DiscoveryError::Auth {
                url,
                challenge: auth_challenge(&response),
            }),
            status => Err(DiscoveryError::Transient {
                status,
                reason: status
                    .canonical_reason()
                    .unwrap_or("unknown reason")
                    .to_string(),
            }),
        }
    }

    fn endpoint_url(&self, path: &str) -> Url {
        let mut url = self.credentials.base_url.clone();
        {
            // Base URL validity is checked when the credentials are loaded.
            let mut segments = url
                .path_segments_mut()
                .expect("base URL was validated at startup");
            segments.pop_if_empty();
            segments.extend(path.split('/'));
        }
        url
    }
}

fn auth_challenge(response: &Response) -> Option<String> {
    response
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
