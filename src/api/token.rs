//! Resolution of the per-account token the history page is keyed by.
//!
//! The portal never returns the token in a structured way; it only shows up inside links and
//! redirect URLs. Discovery therefore runs a list of independent strategies over a few pages
//! and keeps the first candidate that looks like a full token.

use super::endpoint;
use super::error::Error;
use super::session::{Page, Session, Transport};
use crate::model::{abbreviate, Credentials, Portal, Token, TokenSource};
use lazy_static::lazy_static;
use percent_encoding::percent_decode_str;
use regex::Regex;
use scraper::{Html, Selector};

/// Shortest string accepted as a token. Partner tokens and other `token=` parameters on the
/// portal are shorter than the metering point token; this is a heuristic, not a guarantee.
pub const MIN_TOKEN_LENGTH: usize = 50;

const TOKEN_VALUE: &str = r#"token=([^"'\s&<>]+)"#;

lazy_static! {
    static ref TOKEN_PARAM: Regex = Regex::new(TOKEN_VALUE).unwrap();
    static ref ANCHOR: Selector = Selector::parse("a[href]").unwrap();
    static ref SELECTION_TARGET: Regex =
        Regex::new(r"(?i)(dashboard|istoricIndecsi|consumul-meu)").unwrap();
}

/// One way of finding token candidates in a fetched page.
pub trait DiscoveryStrategy {
    fn name(&self) -> &'static str;

    /// Candidate tokens in the order they appear, possibly empty.
    fn candidates(&self, page: &Page) -> Vec<String>;
}

/// Token following the POD number, e.g. in the row of the location table for that POD.
pub struct PodAdjacent {
    pattern: Regex,
}

impl PodAdjacent {
    pub fn new(pod: &str) -> Option<Self> {
        Regex::new(&format!(r"(?s){}.*?{}", regex::escape(pod), TOKEN_VALUE))
            .ok()
            .map(|pattern| PodAdjacent { pattern })
    }
}

impl DiscoveryStrategy for PodAdjacent {
    fn name(&self) -> &'static str {
        "pod-adjacent"
    }

    fn candidates(&self, page: &Page) -> Vec<String> {
        self.pattern
            .captures(&page.body)
            .map(|caps| vec![decode(&caps[1])])
            .unwrap_or_default()
    }
}

/// Token in the URL the portal redirected to.
pub struct RedirectUrl;

impl DiscoveryStrategy for RedirectUrl {
    fn name(&self) -> &'static str {
        "redirect-url"
    }

    fn candidates(&self, page: &Page) -> Vec<String> {
        token_params(&page.url)
    }
}

/// "Select" links of the location list and links into the metering pages.
pub struct SelectionLinks;

impl DiscoveryStrategy for SelectionLinks {
    fn name(&self) -> &'static str {
        "selection-links"
    }

    fn candidates(&self, page: &Page) -> Vec<String> {
        let document = Html::parse_document(&page.body);
        document
            .select(&ANCHOR)
            .filter(|anchor| {
                let href = anchor.value().attr("href").unwrap_or_default();
                let text = anchor.text().collect::<String>();
                SELECTION_TARGET.is_match(href) || text.contains("Selecta")
            })
            .filter_map(|anchor| anchor.value().attr("href"))
            .flat_map(token_params)
            .collect()
    }
}

/// Any `token=` anywhere in the markup.
pub struct PageBody;

impl DiscoveryStrategy for PageBody {
    fn name(&self) -> &'static str {
        "page-body"
    }

    fn candidates(&self, page: &Page) -> Vec<String> {
        token_params(&page.body)
    }
}

fn token_params(text: &str) -> Vec<String> {
    TOKEN_PARAM
        .captures_iter(text)
        .map(|caps| decode(&caps[1]))
        .collect()
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Strategies in the order they are tried on every page.
pub fn strategies(pod: Option<&str>) -> Vec<Box<dyn DiscoveryStrategy>> {
    let mut strategies: Vec<Box<dyn DiscoveryStrategy>> = Vec::new();
    if let Some(strategy) = pod.and_then(PodAdjacent::new) {
        strategies.push(Box::new(strategy));
    }
    strategies.push(Box::new(RedirectUrl));
    strategies.push(Box::new(SelectionLinks));
    strategies.push(Box::new(PageBody));
    strategies
}

/// A configured token long enough to be trusted as is.
pub fn configured_token(credentials: &Credentials) -> Option<Token> {
    let token = credentials.token.as_deref()?.trim();
    if token.chars().count() >= MIN_TOKEN_LENGTH {
        Some(Token::new(token, TokenSource::Configured))
    } else {
        log::warn!(
            "Configured token is shorter than {} characters, ignoring it",
            MIN_TOKEN_LENGTH
        );
        None
    }
}

/// Find the token: the configured one if usable, otherwise discovery over the portal pages.
/// A known POD primes the contract page first so the session points at the right location.
pub fn resolve<T: Transport>(
    session: &mut Session<T>,
    portal: &Portal,
    credentials: &Credentials,
) -> Result<Token, Error> {
    if let Some(token) = configured_token(credentials) {
        log::debug!("Using configured token {}", abbreviate(token.as_str()));
        return Ok(token);
    }

    if !session.is_authenticated() {
        return Err(Error::SessionExpired);
    }

    if let Some(pod) = credentials.pod.as_deref() {
        prime(session, portal, pod)?;
    }

    discover(session, portal, &strategies(credentials.pod.as_deref()))
}

/// Open the contract page of `pod`. Only the side effect on the session matters.
pub fn prime<T: Transport>(
    session: &mut Session<T>,
    portal: &Portal,
    pod: &str,
) -> Result<(), Error> {
    let url = format!(
        "{}?pod={}",
        portal.url(endpoint::CONTRACT_INFO),
        percent_encoding::utf8_percent_encode(pod, percent_encoding::NON_ALPHANUMERIC)
    );
    let page = session.get(&url)?;
    if !page.is_ok() {
        log::warn!("Priming {} answered HTTP {}", url, page.status);
    }
    Ok(())
}

pub fn discover<T: Transport>(
    session: &mut Session<T>,
    portal: &Portal,
    strategies: &[Box<dyn DiscoveryStrategy>],
) -> Result<Token, Error> {
    let mut rejected: Vec<String> = Vec::new();

    for path in &portal.discovery_pages {
        let page = session.get(&portal.url(path))?;
        if portal.is_provider_url(&page.url) {
            log::warn!("Token search on {} bounced to the login page at {}", path, page.url);
            return Err(Error::SessionExpired);
        }
        log::debug!("Searching {} for a token (landed on {})", path, page.url);

        for strategy in strategies {
            for candidate in strategy.candidates(&page) {
                if candidate.chars().count() >= MIN_TOKEN_LENGTH {
                    log::info!(
                        "Discovered token {} on {} via {}",
                        abbreviate(&candidate),
                        path,
                        strategy.name()
                    );
                    return Ok(Token::new(
                        candidate,
                        TokenSource::Discovered {
                            page: path.clone(),
                            strategy: strategy.name(),
                        },
                    ));
                }
                if !rejected.contains(&candidate) {
                    log::debug!("Rejecting short token candidate {}", candidate);
                    rejected.push(candidate);
                }
            }
        }
    }

    log::error!("Could not find a token on any of the checked pages");
    Err(Error::TokenDiscovery {
        min_length: MIN_TOKEN_LENGTH,
        candidates: rejected,
    })
}
