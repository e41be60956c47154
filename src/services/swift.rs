//! OpenStack Swift over HTTP.
//!
//! `SwiftConnection` authenticates against the configured auth endpoint
//! (Swift v1 tempauth, Keystone v2 or Keystone v3), caches the resulting
//! token and storage URL, and performs object GET/PUT against the account.
//!
//! Requests are retried on transport errors and 5xx responses up to the
//! configured retry count. A 401 on object open drops the cached session and
//! re-authenticates before the next attempt.

use crate::{
    config::{EndpointType, StoreConfig},
    models::{
        object::{ObjectInfo, has_dot_segment},
        session::Session,
    },
    services::store::{ObjectReader, PutOptions, StoreConnection, StoreError, StoreResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use reqwest::{Client, Response, StatusCode, Url, header};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::{io, sync::Arc};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};

const AUTH_TOKEN: &str = "X-Auth-Token";
const SUBJECT_TOKEN: &str = "X-Subject-Token";
const STORAGE_URL: &str = "X-Storage-Url";
const OBJECT_STORE_TYPE: &str = "object-store";

/// Build the HTTP client shared by every `SwiftConnection`.
///
/// `reqwest::Client` keeps its own keep-alive pool, so connections built from
/// one client reuse TCP/TLS sessions to the store.
pub fn build_http_client(config: &StoreConfig) -> StoreResult<Client> {
    let client = Client::builder()
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout)
        .user_agent(concat!("swift-gateway/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// A handle to one Swift account.
pub struct SwiftConnection {
    config: Arc<StoreConfig>,
    client: Client,
    session: Option<Session>,
}

impl SwiftConnection {
    pub fn new(config: Arc<StoreConfig>, client: Client) -> Self {
        Self {
            config,
            client,
            session: None,
        }
    }

    /// The cached session, if any. Exposed for diagnostics.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    fn attempts(&self) -> u32 {
        self.config.retries.max(1)
    }

    fn current_session(&self) -> StoreResult<Session> {
        self.session.clone().ok_or(StoreError::NotAuthenticated)
    }

    async fn fetch_session(&self) -> StoreResult<Session> {
        match self.config.auth_version {
            1 => self.auth_v1().await,
            2 => self.auth_v2().await,
            3 => self.auth_v3().await,
            other => Err(StoreError::UnsupportedAuthVersion(other)),
        }
    }

    async fn auth_v1(&self) -> StoreResult<Session> {
        let resp = self
            .client
            .get(&self.config.auth_url)
            .header("X-Auth-User", &self.config.username)
            .header("X-Auth-Key", &self.config.api_key)
            .send()
            .await?;
        let resp = check_auth_status(resp)?;

        let token = header_value(&resp, AUTH_TOKEN)?;
        let storage_url = header_value(&resp, STORAGE_URL)?;
        Ok(Session::new(token, storage_url, None))
    }

    async fn auth_v2(&self) -> StoreResult<Session> {
        let mut auth = Map::new();
        auth.insert(
            "passwordCredentials".into(),
            json!({ "username": self.config.username, "password": self.config.api_key }),
        );
        if !self.config.tenant_id.is_empty() {
            auth.insert("tenantId".into(), json!(self.config.tenant_id));
        } else if !self.config.tenant.is_empty() {
            auth.insert("tenantName".into(), json!(self.config.tenant));
        }

        let resp = self
            .client
            .post(auth_endpoint(&self.config.auth_url, "tokens"))
            .json(&json!({ "auth": auth }))
            .send()
            .await?;
        let body: V2Response = check_auth_status(resp)?.json().await?;

        let storage_url = select_v2_endpoint(
            &body.access.service_catalog,
            &self.config.region,
            self.config.endpoint_type,
        )
        .ok_or_else(|| StoreError::Protocol("no object-store endpoint in catalog".into()))?;

        Ok(Session::new(
            body.access.token.id,
            storage_url,
            body.access.token.expires,
        ))
    }

    async fn auth_v3(&self) -> StoreResult<Session> {
        let resp = self
            .client
            .post(auth_endpoint(&self.config.auth_url, "auth/tokens"))
            .json(&v3_request(&self.config))
            .send()
            .await?;
        let resp = check_auth_status(resp)?;

        let token = header_value(&resp, SUBJECT_TOKEN)?;
        let body: V3Response = resp.json().await?;
        let storage_url = select_v3_endpoint(
            &body.token.catalog,
            &self.config.region,
            self.config.endpoint_type,
        )
        .ok_or_else(|| StoreError::Protocol("no object-store endpoint in catalog".into()))?;

        Ok(Session::new(token, storage_url, body.token.expires_at))
    }
}

#[async_trait]
impl StoreConnection for SwiftConnection {
    async fn authenticate(&mut self) -> StoreResult<()> {
        if self.authenticated() {
            return Ok(());
        }

        let attempts = self.attempts();
        let mut attempt = 1;
        loop {
            match self.fetch_session().await {
                Ok(session) => {
                    debug!(
                        "authenticated with auth v{} against {}",
                        self.config.auth_version, session.storage_url
                    );
                    self.session = Some(session);
                    return Ok(());
                }
                Err(err) if err.is_transient() && attempt < attempts => {
                    warn!("authentication attempt {} failed, retrying: {}", attempt, err);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn authenticated(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_valid)
    }

    async fn object_open(
        &mut self,
        container: &str,
        object: &str,
    ) -> StoreResult<(ObjectReader, ObjectInfo)> {
        let attempts = self.attempts();
        let mut attempt = 1;
        loop {
            let session = self.current_session()?;
            let url = object_url(&session.storage_url, container, object)?;
            let retry = attempt < attempts;

            let err = match self
                .client
                .get(url)
                .header(AUTH_TOKEN, &session.token)
                .send()
                .await
            {
                Ok(resp) if resp.status() == StatusCode::UNAUTHORIZED && retry => {
                    debug!("token rejected while opening {}/{}, re-authenticating", container, object);
                    self.session = None;
                    self.authenticate().await?;
                    attempt += 1;
                    continue;
                }
                Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                    return Err(StoreError::NotFound {
                        container: container.to_string(),
                        object: object.to_string(),
                    });
                }
                Ok(resp) if resp.status().is_success() => {
                    let info = object_info(&resp);
                    let stream = resp.bytes_stream().map_err(io::Error::other);
                    let reader: ObjectReader = Box::new(StreamReader::new(Box::pin(stream)));
                    return Ok((reader, info));
                }
                Ok(resp) => StoreError::Status {
                    status: resp.status(),
                    context: format!("GET {}/{}", container, object),
                },
                Err(err) => StoreError::Http(err),
            };

            if err.is_transient() && retry {
                warn!("open {}/{} attempt {} failed, retrying: {}", container, object, attempt, err);
                attempt += 1;
            } else {
                return Err(err);
            }
        }
    }

    async fn object_put(
        &mut self,
        container: &str,
        object: &str,
        body: ObjectReader,
        options: PutOptions,
    ) -> StoreResult<String> {
        let session = self.current_session()?;
        let url = object_url(&session.storage_url, container, object)?;

        let mut request = self
            .client
            .put(url)
            .header(AUTH_TOKEN, &session.token)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(body)));
        if let Some(len) = options.content_length {
            request = request.header(header::CONTENT_LENGTH, len);
        }
        if let Some(etag) = &options.etag {
            request = request.header(header::ETAG, etag);
        }
        request = match &options.content_type {
            Some(content_type) => request.header(header::CONTENT_TYPE, content_type),
            None => request.header("X-Detect-Content-Type", "true"),
        };

        let resp = request.send().await?;
        match resp.status() {
            status if status.is_success() => Ok(resp
                .headers()
                .get(header::ETAG)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim_matches('"').to_string())
                .unwrap_or_default()),
            StatusCode::UNAUTHORIZED => {
                // The body stream is consumed, so the upload cannot be replayed here.
                self.session = None;
                Err(StoreError::Auth("token rejected during upload".into()))
            }
            StatusCode::NOT_FOUND => Err(StoreError::NotFound {
                container: container.to_string(),
                object: object.to_string(),
            }),
            StatusCode::UNPROCESSABLE_ENTITY => Err(StoreError::Status {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                context: format!("PUT {}/{}: checksum mismatch", container, object),
            }),
            status => Err(StoreError::Status {
                status,
                context: format!("PUT {}/{}", container, object),
            }),
        }
    }
}

/// URL of `object` inside `container` under the account's storage URL.
///
/// The object name is split on `/` so pseudo-folders map to path segments;
/// each segment is percent-encoded.
pub fn object_url(storage_url: &str, container: &str, object: &str) -> StoreResult<Url> {
    // URL path handling drops `.` and `..` segments, which would address a
    // different object.
    if has_dot_segment(container) || has_dot_segment(object) {
        return Err(StoreError::Protocol(format!(
            "object name `{}` has a `.` or `..` segment",
            object
        )));
    }
    let mut url = Url::parse(storage_url)
        .map_err(|err| StoreError::Protocol(format!("invalid storage url `{}`: {}", storage_url, err)))?;
    url.path_segments_mut()
        .map_err(|_| StoreError::Protocol(format!("storage url `{}` has no path", storage_url)))?
        .pop_if_empty()
        .push(container)
        .extend(object.split('/'));
    Ok(url)
}

fn auth_endpoint(auth_url: &str, suffix: &str) -> String {
    format!("{}/{}", auth_url.trim_end_matches('/'), suffix)
}

fn check_auth_status(resp: Response) -> StoreResult<Response> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else if status.is_server_error() {
        Err(StoreError::Status {
            status,
            context: "authentication".into(),
        })
    } else {
        Err(StoreError::Auth(format!("auth service returned {}", status)))
    }
}

fn header_value(resp: &Response, name: &str) -> StoreResult<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| StoreError::Protocol(format!("missing {} header", name)))
}

fn object_info(resp: &Response) -> ObjectInfo {
    let text = |name: header::HeaderName| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    ObjectInfo {
        content_length: resp.content_length(),
        etag: text(header::ETAG).map(|v| v.trim_matches('"').to_string()),
    }
}

/// Keystone v3 password-auth request body.
///
/// Scope is the project by id, else the project by name (in the tenant
/// domain, falling back to the user domain), else the user domain.
fn v3_request(config: &StoreConfig) -> Value {
    let mut user = Map::new();
    user.insert("name".into(), json!(config.username));
    user.insert("password".into(), json!(config.api_key));
    if !config.domain.is_empty() {
        user.insert("domain".into(), json!({ "name": config.domain }));
    }

    let mut auth = Map::new();
    auth.insert(
        "identity".into(),
        json!({ "methods": ["password"], "password": { "user": user } }),
    );

    let scope = if !config.tenant_id.is_empty() {
        Some(json!({ "project": { "id": config.tenant_id } }))
    } else if !config.tenant.is_empty() {
        let project_domain = if config.tenant_domain.is_empty() {
            &config.domain
        } else {
            &config.tenant_domain
        };
        let mut project = Map::new();
        project.insert("name".into(), json!(config.tenant));
        if !project_domain.is_empty() {
            project.insert("domain".into(), json!({ "name": project_domain }));
        }
        Some(json!({ "project": project }))
    } else if !config.domain.is_empty() {
        Some(json!({ "domain": { "name": config.domain } }))
    } else {
        None
    };
    if let Some(scope) = scope {
        auth.insert("scope".into(), scope);
    }

    json!({ "auth": auth })
}

#[derive(Debug, Deserialize)]
struct V2Response {
    access: V2Access,
}

#[derive(Debug, Deserialize)]
struct V2Access {
    token: V2Token,
    #[serde(rename = "serviceCatalog", default)]
    service_catalog: Vec<V2Service>,
}

#[derive(Debug, Deserialize)]
struct V2Token {
    id: String,
    expires: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct V2Service {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    endpoints: Vec<V2Endpoint>,
}

#[derive(Debug, Deserialize)]
struct V2Endpoint {
    region: Option<String>,
    #[serde(rename = "publicURL")]
    public_url: Option<String>,
    #[serde(rename = "internalURL")]
    internal_url: Option<String>,
    #[serde(rename = "adminURL")]
    admin_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct V3Response {
    token: V3Token,
}

#[derive(Debug, Deserialize)]
struct V3Token {
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    catalog: Vec<V3Service>,
}

#[derive(Debug, Deserialize)]
struct V3Service {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    endpoints: Vec<V3Endpoint>,
}

#[derive(Debug, Deserialize)]
struct V3Endpoint {
    interface: String,
    url: String,
    region: Option<String>,
    region_id: Option<String>,
}

fn region_matches(wanted: &str, candidates: &[Option<&str>]) -> bool {
    wanted.is_empty() || candidates.iter().flatten().any(|r| *r == wanted)
}

fn select_v2_endpoint(
    catalog: &[V2Service],
    region: &str,
    endpoint_type: EndpointType,
) -> Option<String> {
    catalog
        .iter()
        .filter(|service| service.kind == OBJECT_STORE_TYPE)
        .flat_map(|service| service.endpoints.iter())
        .filter(|endpoint| region_matches(region, &[endpoint.region.as_deref()]))
        .find_map(|endpoint| match endpoint_type {
            EndpointType::Public => endpoint.public_url.clone(),
            EndpointType::Internal => endpoint.internal_url.clone(),
            EndpointType::Admin => endpoint.admin_url.clone(),
        })
}

fn select_v3_endpoint(
    catalog: &[V3Service],
    region: &str,
    endpoint_type: EndpointType,
) -> Option<String> {
    catalog
        .iter()
        .filter(|service| service.kind == OBJECT_STORE_TYPE)
        .flat_map(|service| service.endpoints.iter())
        .filter(|endpoint| endpoint.interface == endpoint_type.as_str())
        .find(|endpoint| {
            region_matches(
                region,
                &[endpoint.region.as_deref(), endpoint.region_id.as_deref()],
            )
        })
        .map(|endpoint| endpoint.url.clone())
}
