//! Scripted in-memory transport for tests.

use super::error::Error;
use super::session::{Page, Transport};
use http::StatusCode;

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
enum Reply {
    Page(Page),
    Fail(Error),
}

/// Serves a fixed reply per (method, URL) and records what was asked for. Unknown URLs get an
/// empty 404 page.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: HashMap<(Method, String), Reply>,
    requests: Vec<(Method, String)>,
    forms: Vec<Vec<(String, String)>>,
    resets: usize,
}

impl MockTransport {
    /// Answer `GET url` with `body`, as if the browser ended up at `final_url`.
    pub fn on_get(&mut self, url: &str, final_url: &str, status: u16, body: &str) -> &mut Self {
        self.route(Method::Get, url, final_url, status, body)
    }

    pub fn on_post(&mut self, url: &str, final_url: &str, status: u16, body: &str) -> &mut Self {
        self.route(Method::Post, url, final_url, status, body)
    }

    pub fn fail_get(&mut self, url: &str, error: Error) -> &mut Self {
        self.routes
            .insert((Method::Get, url.to_string()), Reply::Fail(error));
        self
    }

    fn route(
        &mut self,
        method: Method,
        url: &str,
        final_url: &str,
        status: u16,
        body: &str,
    ) -> &mut Self {
        let page = Page {
            url: final_url.to_string(),
            status: StatusCode::from_u16(status).unwrap(),
            body: body.to_string(),
        };
        self.routes
            .insert((method, url.to_string()), Reply::Page(page));
        self
    }

    pub fn requests(&self) -> &[(Method, String)] {
        &self.requests
    }

    pub fn count(&self, method: Method, url: &str) -> usize {
        self.requests
            .iter()
            .filter(|(m, u)| *m == method && u == url)
            .count()
    }

    pub fn count_containing(&self, fragment: &str) -> usize {
        self.requests
            .iter()
            .filter(|(_, u)| u.contains(fragment))
            .count()
    }

    pub fn forms(&self) -> &[Vec<(String, String)>] {
        &self.forms
    }

    pub fn resets(&self) -> usize {
        self.resets
    }

    fn reply(&mut self, method: Method, url: &str) -> Result<Page, Error> {
        self.requests.push((method, url.to_string()));
        match self.routes.get(&(method, url.to_string())) {
            Some(Reply::Page(page)) => Ok(page.clone()),
            Some(Reply::Fail(error)) => Err(error.clone()),
            None => Ok(Page {
                url: url.to_string(),
                status: StatusCode::NOT_FOUND,
                body: String::new(),
            }),
        }
    }
}

impl Transport for MockTransport {
    fn get(&mut self, url: &str, _headers: &[(&str, &str)]) -> Result<Page, Error> {
        self.reply(Method::Get, url)
    }

    fn post_form(&mut self, url: &str, form: &[(&str, &str)]) -> Result<Page, Error> {
        self.forms.push(
            form.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self.reply(Method::Post, url)
    }

    fn reset(&mut self) -> Result<(), Error> {
        self.resets += 1;
        Ok(())
    }
}

pub const PORTAL: &str = "https://portal.test";
pub const PROVIDER_PAGE: &str =
    "https://auth.test/realms/deo/protocol/openid-connect/auth?client_id=portal";
pub const FORM_ACTION: &str =
    "https://auth.test/realms/deo/login-actions/authenticate?session_code=abc&execution=1";

pub fn portal() -> crate::model::Portal {
    let mut portal = crate::model::Portal::new(PORTAL);
    portal.provider_domains = vec![String::from("auth.test")];
    portal
}

pub fn login_form() -> String {
    format!(
        r#"<html><body><form id="kc-form-login" action="{}" method="post">
<input name="username"><input name="password" type="password"></form></body></html>"#,
        FORM_ACTION.replace('&', "&amp;")
    )
}

/// A transport on which the login handshake succeeds.
pub fn logged_in_transport() -> MockTransport {
    let mut transport = MockTransport::default();
    transport
        .on_get(
            &format!("{}{}", PORTAL, super::endpoint::LOGIN),
            PROVIDER_PAGE,
            200,
            &login_form(),
        )
        .on_post(
            FORM_ACTION,
            &format!("{}{}", PORTAL, super::endpoint::DASHBOARD),
            200,
            r#"<a href="/checklogout">Deconectare</a>"#,
        );
    transport
}
