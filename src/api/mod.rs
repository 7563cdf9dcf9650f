pub mod auth;
pub mod data;
pub mod endpoint;
pub mod error;
pub mod response;
pub mod session;
pub mod token;

#[cfg(test)]
pub(crate) mod mock;

use crate::model::{Credentials, Portal, Reading, SessionState, Token};
pub use error::{AuthFailure, DataParseError, Error, NetworkError};
pub use session::{HttpTransport, Page, Session, Transport};

use std::time::Duration;

/// Blocking client for one portal account.
///
/// Every call issues its requests one after another and waits for them; run it on a worker
/// thread when the caller lives on an async executor. The client owns the only session of
/// the account, so concurrent use has to be serialized by the caller.
#[derive(Debug)]
pub struct PortalClient<T: Transport = HttpTransport> {
    portal: Portal,
    credentials: Credentials,
    session: Session<T>,
    cached_token: Option<Token>,
}

impl PortalClient<HttpTransport> {
    pub fn new(portal: Portal, credentials: Credentials, timeout: Duration) -> Result<Self, Error> {
        let transport = HttpTransport::new(&portal, timeout)?;
        Ok(PortalClient::with_transport(portal, credentials, transport))
    }
}

impl<T: Transport> PortalClient<T> {
    pub fn with_transport(portal: Portal, credentials: Credentials, transport: T) -> Self {
        PortalClient {
            portal,
            credentials,
            session: Session::new(transport),
            cached_token: None,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.session.is_authenticated() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    }

    /// Log in once. Calling it on an authenticated client does nothing.
    pub fn establish_session(&mut self) -> Result<SessionState, Error> {
        auth::authenticate(&mut self.session, &self.portal, &self.credentials, false)?;
        Ok(self.state())
    }

    /// Throw the session away and log in again.
    pub fn reauthenticate(&mut self) -> Result<SessionState, Error> {
        self.cached_token = None;
        auth::authenticate(&mut self.session, &self.portal, &self.credentials, true)?;
        Ok(self.state())
    }

    /// Fetch the meter readings, logging in first if needed.
    ///
    /// An empty result or a failure that may stem from an expired session earns exactly one
    /// fresh login and one more attempt. Whatever the second attempt returns is final.
    pub fn fetch_readings(&mut self) -> Result<Vec<Reading>, Error> {
        match self.fetch_once() {
            Ok(readings) if !readings.is_empty() => return Ok(readings),
            Ok(_) => log::warn!("Portal returned no readings, logging in again"),
            Err(e) if e.is_session_related() => {
                log::warn!("Fetching readings failed ({}), logging in again", e)
            }
            Err(e) => return Err(e),
        }

        self.reauthenticate()?;
        match self.fetch_once()? {
            readings if readings.is_empty() => Err(Error::NoReadings),
            readings => Ok(readings),
        }
    }

    fn fetch_once(&mut self) -> Result<Vec<Reading>, Error> {
        auth::authenticate(&mut self.session, &self.portal, &self.credentials, false)?;

        let token = match self.cached_token.clone() {
            Some(token) => token,
            None => token::resolve(&mut self.session, &self.portal, &self.credentials)?,
        };
        if self.portal.cache_token && !token.is_configured() {
            self.cached_token = Some(token.clone());
        }

        /* Discovery already primed the session when the POD is known */
        let prime_pod = if token.is_configured() {
            self.credentials.pod.as_deref()
        } else {
            None
        };

        data::fetch_history(&mut self.session, &self.portal, &token, prime_pod)
    }

    pub fn transport(&self) -> &T {
        self.session.transport()
    }
}
