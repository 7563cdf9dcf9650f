//! Cookie-bearing HTTP session that presents itself as a desktop browser.

use super::error::{Error, NetworkError};
use crate::model::Portal;
use http::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, REFERER};
use reqwest::redirect::Policy;

use std::time::Duration;

/// The portal and its identity provider serve different pages to non-browser clients.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const ACCEPT_LANGUAGE_VALUE: &str = "ro-RO,ro;q=0.9,en-US;q=0.8,en;q=0.7";
const MAX_REDIRECTS: usize = 10;

/// A fetched page after all redirects were followed.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Final URL, after redirects.
    pub url: String,
    pub status: StatusCode,
    pub body: String,
}

impl Page {
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }
}

/// Request seam between the portal logic and the wire.
///
/// Implementations follow redirects, keep cookies between calls and send the browser header
/// set with every request.
pub trait Transport {
    fn get(&mut self, url: &str, headers: &[(&str, &str)]) -> Result<Page, Error>;

    fn post_form(&mut self, url: &str, form: &[(&str, &str)]) -> Result<Page, Error>;

    /// Drop all cookies and start from a clean slate.
    fn reset(&mut self) -> Result<(), Error>;
}

/// Blocking reqwest transport.
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    referer: String,
    timeout: Duration,
}

impl HttpTransport {
    /// There is no default timeout; the caller decides how long a hanging portal may block.
    pub fn new(portal: &Portal, timeout: Duration) -> Result<Self, Error> {
        let referer = format!("{}/", portal.base_url);
        let client = build_client(&referer, timeout)?;
        Ok(HttpTransport {
            client,
            referer,
            timeout,
        })
    }

    fn send(&self, request: RequestBuilder) -> Result<Page, Error> {
        let response = request.send().map_err(map_transport_err)?;
        let url = response.url().to_string();
        let status = response.status();
        let body = response.text().map_err(map_transport_err)?;

        log::debug!("{} -> {} ({} bytes)", url, status, body.len());
        log::trace!("body: {}", truncate(&body, 2000));

        Ok(Page { url, status, body })
    }
}

fn build_client(referer: &str, timeout: Duration) -> Result<Client, Error> {
    let mut headers = HeaderMap::new();
    headers.insert(
        REFERER,
        HeaderValue::from_str(referer).map_err(|e| Error::InternalError(e.to_string()))?,
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(ACCEPT_LANGUAGE_VALUE),
    );

    Client::builder()
        .cookie_store(true)
        .user_agent(BROWSER_USER_AGENT)
        .default_headers(headers)
        .redirect(Policy::limited(MAX_REDIRECTS))
        .timeout(timeout)
        .build()
        .map_err(|e| Error::InternalError(format!("unable to build HTTP client: {}", e)))
}

/// Map transport level failure to Error
fn map_transport_err(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::Network(NetworkError::Timeout(error.to_string()))
    } else if let Some(status) = error.status() {
        Error::Network(NetworkError::Status(status.as_u16()))
    } else {
        Error::Network(NetworkError::Transport(error.to_string()))
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

impl Transport for HttpTransport {
    fn get(&mut self, url: &str, headers: &[(&str, &str)]) -> Result<Page, Error> {
        log::debug!("GET {}", url);
        let request = headers
            .iter()
            .fold(self.client.get(url), |request, (name, value)| {
                request.header(*name, *value)
            });
        self.send(request)
    }

    fn post_form(&mut self, url: &str, form: &[(&str, &str)]) -> Result<Page, Error> {
        log::debug!("POST {}", url);
        self.send(self.client.post(url).form(form))
    }

    fn reset(&mut self) -> Result<(), Error> {
        log::debug!("Discarding session cookies");
        self.client = build_client(&self.referer, self.timeout)?;
        Ok(())
    }
}

/// The single session of one account: transport state plus whether the login went through.
#[derive(Debug)]
pub struct Session<T: Transport = HttpTransport> {
    transport: T,
    authenticated: bool,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T) -> Self {
        Session {
            transport,
            authenticated: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub(crate) fn set_authenticated(&mut self) {
        self.authenticated = true;
    }

    /// Forget the login and all cookies.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.authenticated = false;
        self.transport.reset()
    }

    pub fn get(&mut self, url: &str) -> Result<Page, Error> {
        self.transport.get(url, &[])
    }

    pub fn get_with_headers(&mut self, url: &str, headers: &[(&str, &str)]) -> Result<Page, Error> {
        self.transport.get(url, headers)
    }

    pub fn post_form(&mut self, url: &str, form: &[(&str, &str)]) -> Result<Page, Error> {
        self.transport.post_form(url, form)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
