use crate::{browser::BrowserClient, config::HttpConfig, cookie, utils};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use reqwest::{
    Proxy, StatusCode, Url,
    blocking::{Client, ClientBuilder},
    cookie::Jar,
    header::{self, HeaderMap, HeaderName, HeaderValue},
};
use std::{fmt, sync::Arc, thread, time::Duration};
use thiserror::Error;

const PLATFORM_AUTHORIZATION: HeaderName = HeaderName::from_static("x-udemy-authorization");

/// Credentials and client profile attached to a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Identity {
    /// Bearer token and session cookies.
    Session,
    /// Session cookies only.
    NoAuth,
    /// Neither bearer token nor cookies.
    Anonymous,
    /// Separate client presenting the TLS fingerprint of a desktop browser.
    Browser,
}

impl Identity {
    /// Tried in order after the session identity is refused with 403.
    pub const FALLBACK: [Identity; 3] = [Identity::NoAuth, Identity::Anonymous, Identity::Browser];

    pub fn sends_authorization(&self) -> bool {
        matches!(self, Self::Session)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Session => "with session credentials",
            Self::NoAuth => "without authorization header",
            Self::Anonymous => "without authorization header and cookies",
            Self::Browser => "with browser client identity",
        })
    }
}

#[derive(Clone, Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub url: Url,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode, url: Url, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            url,
            body: body.into(),
        }
    }

    fn snippet(&self) -> String {
        String::from_utf8_lossy(&self.body[..self.body.len().min(200)]).into_owned()
    }
}

/// Seam between the session logic and the network.
pub trait Transport {
    fn get(&self, url: &Url, identity: Identity, headers: HeaderMap) -> Result<Response>;
}

/// Reqwest clients backing the session identities and a browser client for the last resort.
pub struct ReqwestTransport {
    session: Client,
    anonymous: Client,
    browser: BrowserClient,
}

impl ReqwestTransport {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let jar = Arc::new(Jar::default());

        if let Some(path) = &config.cookies {
            cookie::load_netscape(path, &jar)?;
        }

        let session = client_builder(config)?
            .user_agent(&config.user_agent)
            .cookie_provider(jar)
            .build()?;
        let anonymous = client_builder(config)?
            .user_agent(&config.user_agent)
            .build()?;

        debug!("browser client profile is {}", BrowserClient::PROFILE);

        Ok(Self {
            session,
            anonymous,
            browser: BrowserClient::new(config)?,
        })
    }

    /// Fingerprint profile of the client used for [`Identity::Browser`].
    pub fn browser_profile(&self) -> &'static str {
        BrowserClient::PROFILE
    }
}

impl Transport for ReqwestTransport {
    fn get(&self, url: &Url, identity: Identity, headers: HeaderMap) -> Result<Response> {
        match identity {
            Identity::Session | Identity::NoAuth => send(&self.session, url, headers),
            Identity::Anonymous => send(&self.anonymous, url, headers),
            Identity::Browser => self.browser.get(url, headers),
        }
    }
}

pub(crate) fn send(client: &Client, url: &Url, headers: HeaderMap) -> Result<Response> {
    let response = client.get(url.clone()).headers(headers).send()?;
    let status = response.status();
    let headers = response.headers().to_owned();
    let url = response.url().to_owned();
    let body = response.bytes()?.to_vec();

    Ok(Response {
        status,
        headers,
        url,
        body,
    })
}

pub(crate) fn client_builder(config: &HttpConfig) -> Result<ClientBuilder> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout);

    if config.no_proxy {
        builder = builder.no_proxy();
    } else if let Some(proxy) = &config.proxy {
        builder = builder.proxy(
            Proxy::all(proxy).with_context(|| format!("invalid proxy address {}", proxy))?,
        );
    }

    Ok(builder)
}

/// Extra headers layered over the session headers for a single request.
#[derive(Clone, Debug, Default)]
pub struct HeaderOverlay {
    referer: Option<String>,
    origin: Option<String>,
}

impl HeaderOverlay {
    pub fn new(referer: Option<String>, origin: Option<String>) -> Self {
        Self { referer, origin }
    }

    fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in [
            (header::REFERER, &self.referer),
            (header::ORIGIN, &self.origin),
        ] {
            if let Some(value) = value {
                match HeaderValue::from_str(value) {
                    Ok(value) => {
                        headers.insert(name, value);
                    }
                    Err(_) => warn!("Ignoring invalid {} header value {:?}", name, value),
                }
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} was forbidden (403) with every client identity")]
    Forbidden { url: String },
    #[error("request to {url} failed with status {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed after {attempts} attempts ({last})")]
    Exhausted {
        url: String,
        attempts: u32,
        last: String,
    },
    #[error("response from {url} is not valid utf-8")]
    Decode { url: String },
}

/// Authenticated HTTP session with transient failure retries and a 403 fallback ladder.
pub struct HttpSession {
    transport: Box<dyn Transport>,
    authorization: Option<HeaderValue>,
    max_retries: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl HttpSession {
    pub fn new(transport: Box<dyn Transport>, config: &HttpConfig) -> Result<Self> {
        let authorization = match &config.bearer {
            Some(token) => {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                    .context("bearer token contains characters not allowed in headers")?;
                value.set_sensitive(true);
                Some(value)
            }
            None => None,
        };

        Ok(Self {
            transport,
            authorization,
            max_retries: config.max_retries.max(1),
            backoff_base: config.backoff_base,
            backoff_max: config.backoff_max,
        })
    }

    pub fn from_config(config: &HttpConfig) -> Result<Self> {
        Self::new(Box::new(ReqwestTransport::new(config)?), config)
    }

    fn headers(&self, identity: Identity, overlay: &HeaderOverlay) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        if identity.sends_authorization()
            && let Some(authorization) = &self.authorization
        {
            headers.insert(header::AUTHORIZATION, authorization.clone());
            headers.insert(PLATFORM_AUTHORIZATION, authorization.clone());
        }

        overlay.apply(&mut headers);
        headers
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(1 << attempt.min(16))
            .min(self.backoff_max)
    }

    /// Wait demanded by a 429 response, `Retry-After` seconds if present.
    fn throttle_wait(&self, response: &Response, attempt: u32) -> Duration {
        response
            .headers
            .get(header::RETRY_AFTER)
            .and_then(|x| x.to_str().ok())
            .and_then(|x| x.trim().parse::<u64>().ok())
            .filter(|x| *x > 0)
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.backoff_base.saturating_mul(2 * (attempt + 1)))
            .min(self.backoff_max)
    }

    pub fn get(&self, url: &Url, overlay: &HeaderOverlay) -> Result<Response, FetchError> {
        match self.get_with_retries(url, overlay) {
            Err(FetchError::Forbidden { .. }) => self.get_with_fallback(url, overlay),
            result => result,
        }
    }

    pub fn get_text(&self, url: &Url, overlay: &HeaderOverlay) -> Result<String, FetchError> {
        let response = self.get(url, overlay)?;
        String::from_utf8(response.body).map_err(|_| FetchError::Decode {
            url: utils::redact_url(url.as_str()),
        })
    }

    fn get_with_retries(&self, url: &Url, overlay: &HeaderOverlay) -> Result<Response, FetchError> {
        let redacted = utils::redact_url(url.as_str());
        let mut last = String::new();

        for attempt in 0..self.max_retries {
            let wait = match self
                .transport
                .get(url, Identity::Session, self.headers(Identity::Session, overlay))
            {
                Ok(response) if response.status.is_success() => return Ok(response),
                Ok(response) if response.status == StatusCode::FORBIDDEN => {
                    return Err(FetchError::Forbidden { url: redacted });
                }
                Ok(response) if response.status == StatusCode::TOO_MANY_REQUESTS => {
                    last = format!("status {}", response.status);
                    self.throttle_wait(&response, attempt)
                }
                Ok(response) if response.status.is_server_error() => {
                    last = format!("status {}", response.status);
                    self.backoff(attempt)
                }
                Ok(response) => {
                    return Err(FetchError::Status {
                        url: redacted,
                        status: response.status.as_u16(),
                    });
                }
                Err(e) => {
                    last = format!("{:#}", e);
                    self.backoff(attempt)
                }
            };

            if attempt + 1 < self.max_retries {
                warn!(
                    "Request to {} failed ({}), retrying in {:.1}s ({}/{})",
                    redacted,
                    last,
                    wait.as_secs_f32(),
                    attempt + 1,
                    self.max_retries
                );
                thread::sleep(wait);
            }
        }

        Err(FetchError::Exhausted {
            url: redacted,
            attempts: self.max_retries,
            last,
        })
    }

    fn get_with_fallback(&self, url: &Url, overlay: &HeaderOverlay) -> Result<Response, FetchError> {
        let redacted = utils::redact_url(url.as_str());

        for identity in Identity::FALLBACK {
            warn!("403 received for {}, retrying {}", redacted, identity);

            match self
                .transport
                .get(url, identity, self.headers(identity, overlay))
            {
                Ok(response) if response.status.is_success() => {
                    info!("Fetched {} {}", redacted, identity);
                    return Ok(response);
                }
                Ok(response) => debug!(
                    "{} {} responded with {}: {}",
                    redacted,
                    identity,
                    response.status,
                    response.snippet()
                ),
                Err(e) => debug!("{} {} failed: {:#}", redacted, identity, e),
            }
        }

        Err(FetchError::Forbidden { url: redacted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::{cell::RefCell, collections::VecDeque};

    type Reply = Result<(u16, &'static str)>;

    struct Scripted {
        replies: RefCell<VecDeque<Reply>>,
        calls: RefCell<Vec<(Identity, HeaderMap)>>,
    }

    impl Scripted {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Transport for &'static Scripted {
        fn get(&self, url: &Url, identity: Identity, headers: HeaderMap) -> Result<Response> {
            self.calls.borrow_mut().push((identity, headers));
            let (status, body) = self
                .replies
                .borrow_mut()
                .pop_front()
                .unwrap_or(Ok((500, "")))?;
            Ok(Response::new(
                StatusCode::from_u16(status).unwrap(),
                url.clone(),
                body,
            ))
        }
    }

    fn session(replies: Vec<Reply>) -> (HttpSession, &'static Scripted) {
        let scripted: &'static Scripted = Box::leak(Box::new(Scripted::new(replies)));
        let config = HttpConfig {
            bearer: Some("secret".to_owned()),
            max_retries: 3,
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
            ..Default::default()
        };
        (
            HttpSession::new(Box::new(scripted), &config).unwrap(),
            scripted,
        )
    }

    fn url() -> Url {
        "https://example.com/assets/1/index.mpd".parse().unwrap()
    }

    #[test]
    fn transient_failures_are_retried() {
        let (session, scripted) = session(vec![
            Err(anyhow!("connection reset")),
            Ok((503, "")),
            Ok((200, "ok")),
        ]);

        let body = session.get_text(&url(), &HeaderOverlay::default()).unwrap();
        assert_eq!(body, "ok");
        assert_eq!(scripted.calls.borrow().len(), 3);
    }

    #[test]
    fn retries_are_bounded() {
        let (session, scripted) = session(vec![Ok((502, "")), Ok((502, "")), Ok((502, ""))]);

        let error = session.get(&url(), &HeaderOverlay::default()).unwrap_err();
        assert!(matches!(error, FetchError::Exhausted { attempts: 3, .. }));
        assert_eq!(scripted.calls.borrow().len(), 3);
    }

    #[test]
    fn client_errors_fail_fast() {
        let (session, scripted) = session(vec![Ok((404, ""))]);

        let error = session.get(&url(), &HeaderOverlay::default()).unwrap_err();
        assert!(matches!(error, FetchError::Status { status: 404, .. }));
        assert_eq!(scripted.calls.borrow().len(), 1);
    }

    #[test]
    fn forbidden_walks_the_fallback_ladder() {
        let (session, scripted) = session(vec![
            Ok((403, "")),
            Ok((403, "denied")),
            Ok((403, "denied")),
            Ok((200, "<MPD/>")),
        ]);
        let overlay = HeaderOverlay::new(
            Some("https://example.com/course/1".to_owned()),
            Some("https://example.com".to_owned()),
        );

        let body = session.get_text(&url(), &overlay).unwrap();
        assert_eq!(body, "<MPD/>");

        let calls = scripted.calls.borrow();
        let identities = calls.iter().map(|x| x.0).collect::<Vec<_>>();
        assert_eq!(
            identities,
            [
                Identity::Session,
                Identity::NoAuth,
                Identity::Anonymous,
                Identity::Browser
            ]
        );

        assert!(calls[0].1.contains_key(header::AUTHORIZATION));
        assert!(calls[0].1.contains_key(PLATFORM_AUTHORIZATION));
        for (_, headers) in &calls[1..] {
            assert!(!headers.contains_key(header::AUTHORIZATION));
            assert!(!headers.contains_key(PLATFORM_AUTHORIZATION));
            assert_eq!(headers[header::ORIGIN], "https://example.com");
            assert_eq!(headers[header::REFERER], "https://example.com/course/1");
        }
    }

    #[test]
    fn forbidden_everywhere_is_reported() {
        let (session, _) = session(vec![
            Ok((403, "")),
            Ok((403, "")),
            Ok((403, "")),
            Ok((403, "")),
        ]);

        let error = session.get(&url(), &HeaderOverlay::default()).unwrap_err();
        assert!(matches!(error, FetchError::Forbidden { .. }));
    }
}
