use chrono::{Local, NaiveDate, TimeZone};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use std::collections::HashMap;
use std::fmt;

const PORTAL_URL: &str = "https://portal.distributieoltenia.ro";
const PROVIDER_DOMAIN: &str = "auth.distributieoltenia.ro";

lazy_static! {
    static ref SAP_DATE: Regex = Regex::new(r"^/Date\((-?\d+)(?:[+-]\d{4})?\)/$").unwrap();
}

/// Login data for one portal account. Immutable once handed to a client.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    /// Token pinned by the user, bypasses discovery when long enough.
    pub token: Option<String>,
    /// Point of delivery number ("POD") of the metering point.
    pub pod: Option<String>,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            email: email.into(),
            password: password.into(),
            token: None,
            pod: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_pod(mut self, pod: Option<String>) -> Self {
        self.pod = pod.filter(|p| !p.trim().is_empty());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("token", &self.token.as_deref().map(abbreviate))
            .field("pod", &self.pod)
            .finish()
    }
}

/// Where the portal and its identity provider live.
#[derive(Debug, Clone)]
pub struct Portal {
    pub base_url: String,
    /// Hosts that belong to the identity provider. Subdomains match too.
    pub provider_domains: Vec<String>,
    /// Pages searched for a token, in order.
    pub discovery_pages: Vec<String>,
    /// Keep a discovered token across fetch cycles until the next forced login.
    pub cache_token: bool,
}

impl Default for Portal {
    fn default() -> Self {
        Portal::new(PORTAL_URL)
    }
}

impl Portal {
    pub fn new(base_url: impl Into<String>) -> Self {
        Portal {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            provider_domains: vec![PROVIDER_DOMAIN.to_string()],
            discovery_pages: crate::api::endpoint::DISCOVERY_PAGES
                .iter()
                .map(|page| page.to_string())
                .collect(),
            cache_token: false,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Whether `url` is served by the identity provider rather than the portal. Only the host
    /// is looked at; the portal's own login path mentions the provider too.
    pub fn is_provider_url(&self, url: &str) -> bool {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .map(|host| {
                host.contains("keycloak")
                    || self.provider_domains.iter().any(|domain| {
                        let domain = domain.to_lowercase();
                        host == domain || host.ends_with(&format!(".{}", domain))
                    })
            })
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    Configured,
    Discovered { page: String, strategy: &'static str },
}

/// Opaque selector of the metering point, passed to the history page.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    value: String,
    source: TokenSource,
}

impl Token {
    pub fn new(value: impl Into<String>, source: TokenSource) -> Self {
        Token {
            value: value.into(),
            source,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn source(&self) -> &TokenSource {
        &self.source
    }

    pub fn is_configured(&self) -> bool {
        self.source == TokenSource::Configured
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &abbreviate(&self.value))
            .field("source", &self.source)
            .finish()
    }
}

/// Shortens secrets for log output.
pub(crate) fn abbreviate(value: &str) -> String {
    match value.char_indices().nth(20) {
        Some((idx, _)) => format!("{}...", &value[..idx]),
        None => value.to_string(),
    }
}

/// A magnitude reported by the portal. Values that do not survive normalisation are kept
/// verbatim so the anomaly stays visible.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Quantity {
    Number(f64),
    Raw(String),
}

impl Quantity {
    /// Parse a value written with `.` as thousands separator and `,` as decimal separator,
    /// e.g. `1.218,001` is 1218.001.
    pub fn from_locale(raw: &str) -> Quantity {
        let cleaned = raw.trim().replace('.', "").replace(',', ".");
        match cleaned.parse::<f64>() {
            Ok(value) => Quantity::Number(value),
            Err(_) => Quantity::Raw(raw.to_string()),
        }
    }

    /// Meter indexes are usually plain decimals; locale formatting is the fallback.
    pub fn from_index(raw: &str) -> Quantity {
        match raw.trim().parse::<f64>() {
            Ok(value) => Quantity::Number(value),
            Err(_) => Quantity::from_locale(raw),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Quantity::Number(value) => Some(*value),
            Quantity::Raw(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ReadingDate {
    Date(NaiveDate),
    Raw(String),
}

impl ReadingDate {
    /// Converts `/Date(<epoch-ms>)/` to the local calendar date. Anything else passes through.
    pub fn parse(raw: &str) -> ReadingDate {
        SAP_DATE
            .captures(raw.trim())
            .and_then(|caps| caps[1].parse::<i64>().ok())
            .and_then(|millis| {
                Local
                    .timestamp_opt(millis.div_euclid(1000), 0)
                    .single()
                    .map(|dt| dt.date_naive())
            })
            .map(ReadingDate::Date)
            .unwrap_or_else(|| ReadingDate::Raw(raw.to_string()))
    }

    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            ReadingDate::Date(date) => Some(*date),
            ReadingDate::Raw(_) => None,
        }
    }
}

/// One row of the history table of a meter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub register: String,
    pub serial: String,
    pub description: String,
    pub index: Option<Quantity>,
    pub consumption: Option<Quantity>,
    pub billing_constant: Option<String>,
    pub reading_type: Option<String>,
    pub reading_date: Option<ReadingDate>,
}

impl Reading {
    /// Identity of the logical sensor this row belongs to.
    pub fn sensor_key(&self) -> Option<(&str, &str)> {
        if self.serial.is_empty() || self.register.is_empty() {
            None
        } else {
            Some((self.serial.as_str(), self.register.as_str()))
        }
    }

    fn date(&self) -> Option<NaiveDate> {
        self.reading_date.as_ref().and_then(ReadingDate::date)
    }
}

/// Latest reading per (serial, register), in order of first appearance. Rows without a serial
/// or register are skipped.
pub fn latest_per_sensor(readings: &[Reading]) -> Vec<&Reading> {
    let mut latest: Vec<&Reading> = Vec::new();
    let mut position: HashMap<(&str, &str), usize> = HashMap::new();

    for reading in readings {
        let key = match reading.sensor_key() {
            Some(key) => key,
            None => continue,
        };

        match position.get(&key) {
            Some(&idx) => {
                if reading.date() > latest[idx].date() {
                    latest[idx] = reading;
                }
            }
            None => {
                position.insert(key, latest.len());
                latest.push(reading);
            }
        }
    }

    latest
}
