//! Login handshake through the identity provider.
//!
//! The portal hands off to a Keycloak realm, the realm serves a login form, and after the
//! form is posted the browser is redirected back to the portal. Some accounts land on a role
//! picker first, which costs one more request.

use super::endpoint;
use super::error::{AuthFailure, Error};
use super::session::{Page, Session, Transport};
use crate::model::{Credentials, Portal};
use lazy_static::lazy_static;
use scraper::{Html, Selector};
use url::Url;

const LOGIN_FORM_SELECTOR: &str = "form#kc-form-login";

/// Body fragments (lower case) only shown to a logged-in user.
const AUTHENTICATED_BODY_MARKERS: &[&str] = &["checklogout", "deconectare", "utilizator:", "istoric"];
const AUTHENTICATED_URL_MARKERS: &[&str] = &["dashboard"];

/// Body fragments (lower case) of the role picker.
const ROLE_SELECTION_MARKERS: &[&str] = &[
    "selectati tipul de utilizator",
    "selectați tipul de utilizator",
];

lazy_static! {
    static ref LOGIN_FORM: Selector = Selector::parse(LOGIN_FORM_SELECTOR).unwrap();
}

#[derive(Debug)]
enum AuthState {
    Anonymous,
    RedirectedToProvider(Page),
    LoginFormLocated { action: String },
    CredentialsSubmitted(Page),
    RoleSelectionRequired,
    Authenticated,
    Failed(AuthFailure),
}

/// Log in unless the session already is. `force` discards the current session first.
pub fn authenticate<T: Transport>(
    session: &mut Session<T>,
    portal: &Portal,
    credentials: &Credentials,
    force: bool,
) -> Result<(), Error> {
    if session.is_authenticated() && !force {
        log::trace!("Session already authenticated");
        return Ok(());
    }
    if force {
        session.reset()?;
    }

    let mut state = AuthState::Anonymous;
    loop {
        state = match state {
            AuthState::Authenticated => {
                session.set_authenticated();
                log::info!("Logged in as {}", credentials.email);
                return Ok(());
            }
            AuthState::Failed(reason) => {
                log::error!("Login as {} failed: {}", credentials.email, reason);
                return Err(Error::Authentication(reason));
            }
            state => {
                let next = step(state, session, portal, credentials)?;
                log::debug!("Login state: {}", describe(&next));
                next
            }
        };
    }
}

fn step<T: Transport>(
    state: AuthState,
    session: &mut Session<T>,
    portal: &Portal,
    credentials: &Credentials,
) -> Result<AuthState, Error> {
    let next = match state {
        AuthState::Anonymous => {
            let page = session.get(&portal.url(endpoint::LOGIN))?;
            if portal.is_provider_url(&page.url) {
                AuthState::RedirectedToProvider(page)
            } else {
                log::error!("Login entry did not redirect to provider, ended at {}", page.url);
                AuthState::Failed(AuthFailure::NoProviderRedirect)
            }
        }
        AuthState::RedirectedToProvider(page) => match login_form_action(&page) {
            Some(action) => AuthState::LoginFormLocated { action },
            None => AuthState::Failed(AuthFailure::LoginFormNotFound),
        },
        AuthState::LoginFormLocated { action } => {
            let form = [
                ("username", credentials.email.as_str()),
                ("password", credentials.password.as_str()),
                ("credentialId", ""),
            ];
            AuthState::CredentialsSubmitted(session.post_form(&action, &form)?)
        }
        AuthState::CredentialsSubmitted(page) => {
            if requires_role_selection(&page) {
                AuthState::RoleSelectionRequired
            } else {
                verdict(&page)
            }
        }
        AuthState::RoleSelectionRequired => {
            let page = session.get(&portal.url(endpoint::ROLE_LANDING))?;
            verdict(&page)
        }
        terminal => terminal,
    };
    Ok(next)
}

fn verdict(page: &Page) -> AuthState {
    if is_authenticated_page(page) {
        AuthState::Authenticated
    } else {
        log::error!("Login failed. Final URL: {}", page.url);
        log::debug!("Response preview: {}", super::session::truncate(&page.body, 2000));
        AuthState::Failed(AuthFailure::CredentialsRejected)
    }
}

fn describe(state: &AuthState) -> &'static str {
    match state {
        AuthState::Anonymous => "anonymous",
        AuthState::RedirectedToProvider(_) => "redirected to provider",
        AuthState::LoginFormLocated { .. } => "login form located",
        AuthState::CredentialsSubmitted(_) => "credentials submitted",
        AuthState::RoleSelectionRequired => "role selection required",
        AuthState::Authenticated => "authenticated",
        AuthState::Failed(_) => "failed",
    }
}

/// Absolute action URL of the provider's login form.
fn login_form_action(page: &Page) -> Option<String> {
    let document = Html::parse_document(&page.body);
    let action = document
        .select(&LOGIN_FORM)
        .next()?
        .value()
        .attr("action")?
        .trim()
        .to_string();

    match Url::parse(&page.url).and_then(|base| base.join(&action)) {
        Ok(url) => Some(url.to_string()),
        Err(_) if !action.is_empty() => Some(action),
        Err(_) => None,
    }
}

fn requires_role_selection(page: &Page) -> bool {
    let body = page.body.to_lowercase();
    ROLE_SELECTION_MARKERS
        .iter()
        .any(|marker| body.contains(marker))
}

fn is_authenticated_page(page: &Page) -> bool {
    let body = page.body.to_lowercase();
    let url = page.url.to_lowercase();

    AUTHENTICATED_BODY_MARKERS
        .iter()
        .any(|marker| body.contains(marker))
        || AUTHENTICATED_URL_MARKERS
            .iter()
            .any(|marker| url.contains(marker))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::mock::{self, logged_in_transport, Method, MockTransport};

    fn credentials() -> Credentials {
        Credentials::new("user@example.com", "secret")
    }

    fn login_url() -> String {
        format!("{}{}", mock::PORTAL, endpoint::LOGIN)
    }

    #[test]
    fn successful_login() {
        let mut session = Session::new(logged_in_transport());
        authenticate(&mut session, &mock::portal(), &credentials(), false).unwrap();

        assert!(session.is_authenticated());
        let forms = session.transport().forms();
        assert_eq!(1, forms.len());
        assert!(forms[0].contains(&(String::from("username"), String::from("user@example.com"))));
        assert!(forms[0].contains(&(String::from("password"), String::from("secret"))));
        assert!(forms[0].contains(&(String::from("credentialId"), String::new())));
    }

    #[test]
    fn second_login_is_a_no_op() {
        let mut session = Session::new(logged_in_transport());
        let portal = mock::portal();
        authenticate(&mut session, &portal, &credentials(), false).unwrap();
        let before = session.transport().requests().len();

        authenticate(&mut session, &portal, &credentials(), false).unwrap();
        assert_eq!(before, session.transport().requests().len());
    }

    #[test]
    fn forced_login_starts_over() {
        let mut session = Session::new(logged_in_transport());
        let portal = mock::portal();
        authenticate(&mut session, &portal, &credentials(), false).unwrap();
        authenticate(&mut session, &portal, &credentials(), true).unwrap();

        assert_eq!(2, session.transport().count(Method::Get, &login_url()));
        assert_eq!(1, session.transport().resets());
    }

    #[test]
    fn missing_provider_redirect() {
        let mut transport = MockTransport::default();
        transport.on_get(&login_url(), "https://portal.test/login", 200, "<html></html>");
        let mut session = Session::new(transport);

        let result = authenticate(&mut session, &mock::portal(), &credentials(), false);
        assert_eq!(Err(Error::Authentication(AuthFailure::NoProviderRedirect)), result);
        assert!(session.transport().forms().is_empty());
        assert!(!session.is_authenticated());
    }

    #[test]
    fn login_entry_served_by_portal_itself() {
        let mut transport = MockTransport::default();
        transport.on_get(&login_url(), &login_url(), 200, "<html>portal</html>");
        let mut session = Session::new(transport);

        let result = authenticate(&mut session, &mock::portal(), &credentials(), false);
        assert_eq!(Err(Error::Authentication(AuthFailure::NoProviderRedirect)), result);
        assert!(session.transport().forms().is_empty());
    }

    #[test]
    fn missing_login_form() {
        let mut transport = MockTransport::default();
        transport.on_get(
            &login_url(),
            mock::PROVIDER_PAGE,
            200,
            r#"<form id="something-else" action="/x"></form>"#,
        );
        let mut session = Session::new(transport);

        let result = authenticate(&mut session, &mock::portal(), &credentials(), false);
        assert_eq!(Err(Error::Authentication(AuthFailure::LoginFormNotFound)), result);
        assert!(session.transport().forms().is_empty());
    }

    #[test]
    fn rejected_credentials() {
        let mut transport = MockTransport::default();
        transport
            .on_get(&login_url(), mock::PROVIDER_PAGE, 200, &mock::login_form())
            .on_post(
                mock::FORM_ACTION,
                mock::FORM_ACTION,
                200,
                "<span>Invalid username or password.</span>",
            );
        let mut session = Session::new(transport);

        let result = authenticate(&mut session, &mock::portal(), &credentials(), false);
        assert_eq!(Err(Error::Authentication(AuthFailure::CredentialsRejected)), result);
        assert!(!session.is_authenticated());
    }

    #[test]
    fn role_selection_takes_one_more_hop() {
        let mut transport = MockTransport::default();
        let landing = format!("{}{}", mock::PORTAL, endpoint::ROLE_LANDING);
        transport
            .on_get(&login_url(), mock::PROVIDER_PAGE, 200, &mock::login_form())
            .on_post(
                mock::FORM_ACTION,
                "https://portal.test/roles",
                200,
                r#"<h3>Selectați tipul de utilizator</h3><a href="/loginuserkeycloak?user_type=end_client">Client final</a>"#,
            )
            .on_get(&landing, "https://portal.test/end_client/list", 200, "Deconectare");
        let mut session = Session::new(transport);

        authenticate(&mut session, &mock::portal(), &credentials(), false).unwrap();
        assert_eq!(1, session.transport().count(Method::Get, &landing));
        assert!(session.is_authenticated());
    }

    #[test]
    fn login_entry_link_alone_is_not_a_role_picker() {
        let mut transport = MockTransport::default();
        let landing = format!("{}{}", mock::PORTAL, endpoint::ROLE_LANDING);
        transport
            .on_get(&login_url(), mock::PROVIDER_PAGE, 200, &mock::login_form())
            .on_post(
                mock::FORM_ACTION,
                "https://portal.test/pages/dashboard",
                200,
                r#"<a href="/loginuserkeycloak?user_type=end_client">Cont</a> Deconectare"#,
            );
        let mut session = Session::new(transport);

        authenticate(&mut session, &mock::portal(), &credentials(), false).unwrap();
        assert_eq!(0, session.transport().count(Method::Get, &landing));
        assert!(session.is_authenticated());
    }

    #[test]
    fn relative_form_action_is_resolved() {
        let page = Page {
            url: String::from("https://auth.test/realms/deo/protocol/openid-connect/auth"),
            status: http::StatusCode::OK,
            body: String::from(
                r#"<form id="kc-form-login" action="/realms/deo/login-actions/authenticate?a=1&amp;b=2"></form>"#,
            ),
        };
        assert_eq!(
            Some(String::from(
                "https://auth.test/realms/deo/login-actions/authenticate?a=1&b=2"
            )),
            login_form_action(&page)
        );
    }
}
