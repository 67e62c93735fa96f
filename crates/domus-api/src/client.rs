// Portal HTTP client
//
// Wraps `reqwest::Client` with portal URL construction, bearer-token
// injection, and error-envelope parsing. All endpoint families (setup,
// events, exec) are implemented as inherent methods via separate files to
// keep this module focused on transport mechanics.

use std::sync::{Arc, RwLock};

use reqwest::cookie::Jar;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::models::ErrorEnvelope;
use crate::portal::Portal;
use crate::transport::TransportConfig;

/// Raw HTTP client for the enduser portal API.
///
/// Session state lives in the cookie jar (the portal sets `JSESSIONID` on
/// login); portals behind a token service additionally carry a bearer
/// token that is applied to every request once obtained. Callers see
/// parsed payloads only — the error envelope is turned into [`Error`]
/// before it reaches them.
pub struct PortalClient {
    http: reqwest::Client,
    endpoint: Url,
    portal: Portal,
    /// Bearer token from the portal's token service. Absent for portals
    /// with direct cookie login. Replaced on every token exchange.
    bearer: RwLock<Option<String>>,
    cookie_jar: Option<Arc<Jar>>,
}

impl PortalClient {
    /// Create a new portal client from a `TransportConfig`.
    ///
    /// If the config doesn't already include a cookie jar, one is created
    /// automatically (portal auth requires cookies).
    pub fn new(portal: Portal, transport: &TransportConfig) -> Result<Self, Error> {
        let config = if transport.cookie_jar.is_some() {
            transport.clone()
        } else {
            transport.clone().with_cookie_jar()
        };
        let cookie_jar = config.cookie_jar.clone();
        let http = config.build_client()?;
        let endpoint = portal.endpoint()?;
        Ok(Self {
            http,
            endpoint,
            portal,
            bearer: RwLock::new(None),
            cookie_jar,
        })
    }

    /// The portal this client talks to.
    pub fn portal(&self) -> &Portal {
        &self.portal
    }

    /// The enduser API base URL.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The underlying HTTP client (for auth flows that need direct access).
    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Whether a session cookie is currently present in the jar.
    pub fn has_session_cookie(&self) -> bool {
        use reqwest::cookie::CookieStore;
        self.cookie_jar
            .as_ref()
            .and_then(|jar| jar.cookies(&self.endpoint))
            .is_some()
    }

    // ── Bearer token management ──────────────────────────────────────

    /// Store a bearer token obtained from the portal's token service.
    pub(crate) fn set_bearer(&self, token: String) {
        trace!("storing bearer token");
        *self.bearer.write().expect("bearer lock poisoned") = Some(token);
    }

    /// Apply the stored bearer token to a request builder.
    pub(crate) fn apply_bearer(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let guard = self.bearer.read().expect("bearer lock poisoned");
        match guard.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build a full URL for an API path relative to the portal endpoint.
    pub(crate) fn url(&self, path: &str) -> Result<Url, Error> {
        self.endpoint.join(path).map_err(Error::InvalidUrl)
    }

    /// Build a device-scoped URL: `setup/devices/{encoded-url}/{suffix}`.
    ///
    /// Device URLs contain `://` and `#`, so they are percent-encoded as a
    /// single path segment.
    pub(crate) fn device_url(&self, raw_device_url: &str, suffix: &str) -> Result<Url, Error> {
        let encoded = urlencoding::encode(raw_device_url);
        let path = if suffix.is_empty() {
            format!("setup/devices/{encoded}")
        } else {
            format!("setup/devices/{encoded}/{suffix}")
        };
        self.url(&path)
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send a GET request and parse the JSON payload.
    pub(crate) async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);
        let builder = self.apply_bearer(self.http.get(url));
        let resp = builder.send().await.map_err(Error::Transport)?;
        self.parse_json(resp).await
    }

    /// Send a POST request with a JSON body and parse the JSON payload.
    pub(crate) async fn post_json<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &(impl Serialize + Sync),
    ) -> Result<T, Error> {
        debug!("POST {}", url);
        let builder = self.apply_bearer(self.http.post(url).json(body));
        let resp = builder.send().await.map_err(Error::Transport)?;
        self.parse_json(resp).await
    }

    /// Send a bodyless POST request and parse the JSON payload.
    pub(crate) async fn post_empty_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("POST {}", url);
        let builder = self.apply_bearer(self.http.post(url));
        let resp = builder.send().await.map_err(Error::Transport)?;
        self.parse_json(resp).await
    }

    /// Send a bodyless POST request, expecting no payload.
    pub(crate) async fn post_no_content(&self, url: Url) -> Result<(), Error> {
        debug!("POST {}", url);
        let builder = self.apply_bearer(self.http.post(url));
        let resp = builder.send().await.map_err(Error::Transport)?;
        self.check_status(resp).await
    }

    /// Send a bodyless PUT request, expecting no payload.
    pub(crate) async fn put_no_content(&self, url: Url) -> Result<(), Error> {
        debug!("PUT {}", url);
        let builder = self.apply_bearer(self.http.put(url));
        let resp = builder.send().await.map_err(Error::Transport)?;
        self.check_status(resp).await
    }

    /// Send a DELETE request, expecting no payload.
    pub(crate) async fn delete_no_content(&self, url: Url) -> Result<(), Error> {
        debug!("DELETE {}", url);
        let builder = self.apply_bearer(self.http.delete(url));
        let resp = builder.send().await.map_err(Error::Transport)?;
        self.check_status(resp).await
    }

    // ── Response parsing ─────────────────────────────────────────────

    /// Parse a JSON success payload, or the error envelope on failure.
    async fn parse_json<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        if !status.is_success() {
            return Err(classify_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            let preview = &body[..body.len().min(200)];
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body,
            }
        })
    }

    /// Check the status of a response whose payload is irrelevant.
    async fn check_status(&self, resp: reqwest::Response) -> Result<(), Error> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify_error(status, &body))
    }
}

/// Map a non-success response to an [`Error`], parsing the vendor error
/// envelope when present. HTTP 401 is always an authentication failure;
/// the envelope's `errorCode` decides which kind.
pub(crate) fn classify_error(status: reqwest::StatusCode, body: &str) -> Error {
    let envelope: Option<ErrorEnvelope> = serde_json::from_str(body).ok();
    let (code, message) = match envelope {
        Some(env) => (
            env.error_code,
            env.error.unwrap_or_else(|| format!("HTTP {status}")),
        ),
        None => (
            None,
            format!("HTTP {status}: {}", &body[..body.len().min(200)]),
        ),
    };

    if status == reqwest::StatusCode::UNAUTHORIZED {
        Error::Authentication { message, code }
    } else {
        Error::Api {
            message,
            code,
            status: status.as_u16(),
        }
    }
}
