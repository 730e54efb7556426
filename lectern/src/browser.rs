//! Client behind [`Identity::Browser`](crate::http::Identity::Browser), the last step of the
//! 403 ladder. With the `impersonate` feature it speaks Chrome's TLS and HTTP/2 fingerprint,
//! otherwise it only borrows Chrome's headers.

use crate::{config::HttpConfig, http::Response};
use anyhow::Result;
use reqwest::{Url, header::HeaderMap};

#[cfg(feature = "impersonate")]
pub use chrome::ChromeClient as BrowserClient;
#[cfg(not(feature = "impersonate"))]
pub use headers::HeaderClient as BrowserClient;

#[cfg(feature = "impersonate")]
mod chrome {
    use super::*;
    use anyhow::Context;
    use reqwest::{
        StatusCode,
        header::{HeaderName, HeaderValue},
    };
    use tokio::runtime::{Builder, Runtime};
    use wreq_util::Emulation;

    /// `wreq` client emulating Chrome, driven by its own single-threaded runtime.
    pub struct ChromeClient {
        runtime: Runtime,
        client: wreq::Client,
    }

    impl ChromeClient {
        pub const PROFILE: &'static str = "chrome131";

        pub fn new(config: &HttpConfig) -> Result<Self> {
            let mut builder = wreq::Client::builder()
                .emulation(Emulation::Chrome131)
                .connect_timeout(config.connect_timeout)
                .timeout(config.request_timeout);

            if config.no_proxy {
                builder = builder.no_proxy();
            } else if let Some(proxy) = &config.proxy {
                builder = builder.proxy(
                    wreq::Proxy::all(proxy.as_str())
                        .with_context(|| format!("invalid proxy {}", proxy))?,
                );
            }

            let runtime = Builder::new_current_thread().enable_all().build()?;

            Ok(Self {
                runtime,
                client: builder.build()?,
            })
        }

        pub fn get(&self, url: &Url, headers: HeaderMap) -> Result<Response> {
            self.runtime.block_on(async {
                let mut request = self.client.get(url.as_str());

                for (name, value) in &headers {
                    request = request.header(name.as_str(), value.as_bytes());
                }

                let response = request.send().await?;
                let status = StatusCode::from_u16(response.status().as_u16())?;
                let mut received = HeaderMap::new();

                for (name, value) in response.headers() {
                    received.append(
                        HeaderName::from_bytes(name.as_str().as_bytes())?,
                        HeaderValue::from_bytes(value.as_bytes())?,
                    );
                }

                let final_url = Url::parse(response.url().as_str())?;
                let body = response.bytes().await?.to_vec();

                Ok(Response {
                    status,
                    headers: received,
                    url: final_url,
                    body,
                })
            })
        }
    }
}

#[cfg(not(feature = "impersonate"))]
mod headers {
    use super::*;
    use reqwest::{
        blocking::Client,
        header::{self, HeaderValue},
    };

    const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

    /// Plain reqwest client sending Chrome's user agent and navigation headers.
    pub struct HeaderClient {
        client: Client,
    }

    impl HeaderClient {
        pub const PROFILE: &'static str = "headers";

        pub fn new(config: &HttpConfig) -> Result<Self> {
            let client = crate::http::client_builder(config)?
                .user_agent(USER_AGENT)
                .default_headers(navigation_headers())
                .build()?;

            Ok(Self { client })
        }

        pub fn get(&self, url: &Url, headers: HeaderMap) -> Result<Response> {
            crate::http::send(&self.client, url, headers)
        }
    }

    fn navigation_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ReqwestTransport;

    #[test]
    #[cfg(feature = "impersonate")]
    fn browser_identity_emulates_chrome() {
        let config = HttpConfig::default();
        let transport = ReqwestTransport::new(&config).unwrap();
        assert_eq!(transport.browser_profile(), "chrome131");
        assert!(BrowserClient::new(&config).is_ok());
    }

    #[test]
    #[cfg(not(feature = "impersonate"))]
    fn browser_identity_falls_back_to_headers() {
        let config = HttpConfig::default();
        let transport = ReqwestTransport::new(&config).unwrap();
        assert_eq!(transport.browser_profile(), "headers");
    }
}
