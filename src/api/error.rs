use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use std::io::Cursor;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NetworkError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("portal responded with HTTP {0}")]
    Status(u16),
}

/// Why the login handshake stopped. Wrong passwords and a changed portal UI look the same
/// from the outside and both end up as `CredentialsRejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("no provider redirect")]
    NoProviderRedirect,
    #[error("login form not found")]
    LoginFormNotFound,
    #[error("credentials rejected or UI changed")]
    CredentialsRejected,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataParseError {
    #[error("no embedded data array found in history page")]
    LiteralNotFound,
    #[error("embedded data array is not valid JSON: {0}")]
    Json(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthFailure),
    #[error("no token of at least {min_length} characters found (shorter candidates: {candidates:?})")]
    TokenDiscovery {
        min_length: usize,
        candidates: Vec<String>,
    },
    #[error(transparent)]
    DataParse(#[from] DataParseError),
    #[error("session is not authenticated")]
    SessionExpired,
    #[error("portal returned no readings")]
    NoReadings,
    #[error("internal error: {0}")]
    InternalError(String),
}

impl Error {
    /// Failures that may be caused by an expired session and are worth one fresh login.
    pub fn is_session_related(&self) -> bool {
        matches!(self, Error::Network(_) | Error::SessionExpired)
    }

    /// Message shown when the initial login fails and the account cannot be activated.
    pub fn setup_message(&self) -> &'static str {
        match self {
            Error::Authentication(AuthFailure::CredentialsRejected) => {
                "Invalid e-mail or password (or the portal changed its post-login pages)"
            }
            Error::Authentication(AuthFailure::LoginFormNotFound)
            | Error::Authentication(AuthFailure::NoProviderRedirect) => {
                "The portal login page layout changed; login cannot proceed"
            }
            Error::Network(_) => "The portal is unreachable",
            _ => "Unexpected error while connecting to the portal",
        }
    }
}

fn html_response(status: Status, title: &str, detail: &Error) -> response::Result<'static> {
    let body = format!(
        "<html><body><h3>{}</h3>Portal error: <code>{}</code></body></html>",
        title, detail
    );
    Response::build()
        .status(status)
        .sized_body(body.len(), Cursor::new(body))
        .header(ContentType::new("text", "html"))
        .ok()
}

impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        match self {
            Error::Authentication(_) | Error::SessionExpired => {
                html_response(Status::Forbidden, "403 Forbidden", &self)
            }
            Error::Network(_) => html_response(Status::BadGateway, "502 Bad Gateway", &self),
            _ => html_response(Status::InternalServerError, "Unknown exception", &self),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn auth_failures_read_as_reasons() {
        assert_eq!(
            "authentication failed: no provider redirect",
            Error::from(AuthFailure::NoProviderRedirect).to_string()
        );
        assert_eq!(
            "credentials rejected or UI changed",
            AuthFailure::CredentialsRejected.to_string()
        );
    }

    #[test]
    fn setup_messages_are_distinct() {
        let rejected = Error::from(AuthFailure::CredentialsRejected).setup_message();
        let layout = Error::from(AuthFailure::LoginFormNotFound).setup_message();
        let unreachable =
            Error::from(NetworkError::Transport(String::from("dns"))).setup_message();

        assert_ne!(rejected, layout);
        assert_ne!(rejected, unreachable);
        assert_ne!(layout, unreachable);
    }

    #[test]
    fn only_network_and_expiry_are_retried() {
        assert!(Error::from(NetworkError::Status(500)).is_session_related());
        assert!(Error::SessionExpired.is_session_related());
        assert!(!Error::from(DataParseError::LiteralNotFound).is_session_related());
        assert!(!Error::from(AuthFailure::CredentialsRejected).is_session_related());
    }
}
