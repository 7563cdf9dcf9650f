//! Readings embedded in the history page as `let data = [...];`.

use super::endpoint;
use super::error::{DataParseError, Error, NetworkError};
use super::response::HistoryRow;
use super::session::{Session, Transport};
use crate::model::{Portal, Reading, Token};
use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

const HISTORY_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

lazy_static! {
    static ref DATA_LITERAL: Regex =
        Regex::new(r"(?s)(?:let|var)\s+data\s*=\s*(\[.*?\]);").unwrap();
}

pub fn history_url(portal: &Portal, token: &Token) -> Result<String, Error> {
    let mut url = Url::parse(&portal.url(endpoint::HISTORY))
        .map_err(|e| Error::InternalError(format!("invalid history URL: {}", e)))?;
    url.query_pairs_mut().append_pair("token", token.as_str());
    Ok(url.to_string())
}

/// Fetch and decode the history table for `token`. `prime_pod` opens the contract page of
/// that POD first.
pub fn fetch_history<T: Transport>(
    session: &mut Session<T>,
    portal: &Portal,
    token: &Token,
    prime_pod: Option<&str>,
) -> Result<Vec<Reading>, Error> {
    if !session.is_authenticated() {
        return Err(Error::SessionExpired);
    }
    if let Some(pod) = prime_pod {
        super::token::prime(session, portal, pod)?;
    }

    let url = history_url(portal, token)?;
    let referer = portal.url(endpoint::DASHBOARD);
    log::debug!("Fetching history from {}", portal.url(endpoint::HISTORY));

    let page = session.get_with_headers(
        &url,
        &[("Accept", HISTORY_ACCEPT), ("Referer", referer.as_str())],
    )?;

    if portal.is_provider_url(&page.url) {
        log::warn!("History request bounced to the login page at {}", page.url);
        return Err(Error::SessionExpired);
    }
    if !page.is_ok() {
        return Err(Error::Network(NetworkError::Status(page.status.as_u16())));
    }

    let literal = extract_literal(&page.body)?;
    let readings = decode_readings(literal)?;
    log::debug!("Decoded {} readings", readings.len());
    log::trace!("Readings: {:#?}", readings);
    Ok(readings)
}

/// The bracketed array of the first `let data = [...];` or `var data = [...];`.
pub fn extract_literal(body: &str) -> Result<&str, DataParseError> {
    DATA_LITERAL
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| {
            log::error!(
                "Could not find data array in history page ({} bytes)",
                body.len()
            );
            DataParseError::LiteralNotFound
        })
}

/// Parse the array, retrying once with `\/` unescaped. Nothing else is repaired.
pub fn decode_readings(literal: &str) -> Result<Vec<Reading>, DataParseError> {
    let rows = match serde_json::from_str::<Vec<HistoryRow>>(literal) {
        Ok(rows) => rows,
        Err(first) => {
            log::warn!("JSON decode failed ({}), retrying with unescaped slashes", first);
            serde_json::from_str::<Vec<HistoryRow>>(&literal.replace("\\/", "/"))
                .map_err(|e| DataParseError::Json(e.to_string()))?
        }
    };

    Ok(rows.into_iter().map(Reading::from).collect())
}
