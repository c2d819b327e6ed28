//! Source extractor contract, the static source registry and the municipal
//! extractors built on it.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use stipendify_core::{OrganisationCandidate, ScholarshipCandidate};
use stipendify_storage::{FetchError, HttpFetcher};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

pub mod normalize;
pub mod pdf;
pub mod sources;

pub use sources::{RijekaExtractor, SibenikExtractor, SplitExtractor, ZagrebExtractor};

pub const CRATE_NAME: &str = "stipendify-adapters";

/// Every built-in source, in the order a full pass visits them.
pub const SOURCE_IDS: [&str; 4] = ["zagreb", "rijeka", "split", "sibenik"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractContext {
    pub run_id: Uuid,
}

impl ExtractContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
        }
    }
}

impl Default for ExtractContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("fetching {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("invalid selector {selector:?}: {message}")]
    Selector { selector: String, message: String },
    #[error("invalid url {url:?}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("pdf: {0}")]
    Pdf(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Two-phase capability every municipal source implements: list the detail
/// pages, then turn one detail page into a candidate.
#[async_trait]
pub trait SourceExtractor: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// Publisher of every scholarship this source yields.
    fn organisation(&self) -> OrganisationCandidate;

    fn listing_url(&self) -> &str;

    /// Detail URLs in listing order, deduplicated. A failure here aborts the
    /// source for this pass.
    async fn discover(
        &self,
        http: &HttpFetcher,
        ctx: &ExtractContext,
    ) -> Result<Vec<String>, ExtractError>;

    async fn extract(
        &self,
        http: &HttpFetcher,
        ctx: &ExtractContext,
        detail_url: &str,
    ) -> Result<ScholarshipCandidate, ExtractError>;
}

/// Looks up a built-in source, optionally pointing it at another listing page.
pub fn extractor_for_source(
    source_id: &str,
    listing_override: Option<&str>,
) -> Option<Box<dyn SourceExtractor>> {
    let listing = listing_override.map(ToString::to_string);
    match source_id {
        "zagreb" => Some(Box::new(ZagrebExtractor::new(listing))),
        "rijeka" => Some(Box::new(RijekaExtractor::new(listing))),
        "split" => Some(Box::new(SplitExtractor::new(listing))),
        "sibenik" => Some(Box::new(SibenikExtractor::new(listing))),
        _ => None,
    }
}

pub fn all_extractors() -> Vec<Box<dyn SourceExtractor>> {
    SOURCE_IDS
        .iter()
        .filter_map(|id| extractor_for_source(id, None))
        .collect()
}

pub(crate) async fn fetch_html(
    http: &HttpFetcher,
    ctx: &ExtractContext,
    source_id: &str,
    url: &str,
) -> Result<String, ExtractError> {
    http.fetch_bytes(ctx.run_id, source_id, url)
        .await
        .map(|resp| resp.text())
        .map_err(|source| ExtractError::Fetch {
            url: url.to_string(),
            source,
        })
}

pub(crate) fn parse_url(url: &str) -> Result<Url, ExtractError> {
    Url::parse(url).map_err(|source| ExtractError::Url {
        url: url.to_string(),
        source,
    })
}

/// Root of the site hosting `listing_url`; the municipal sites write
/// root-relative links without a leading slash.
pub(crate) fn site_root(listing_url: &str) -> Result<Url, ExtractError> {
    let listing = parse_url(listing_url)?;
    listing.join("/").map_err(|source| ExtractError::Url {
        url: listing_url.to_string(),
        source,
    })
}

/// Joins `href` onto `base`, dropping fragments and non-http schemes.
pub(crate) fn resolve(base: &Url, href: &str) -> Option<String> {
    let mut joined = base.join(href.trim()).ok()?;
    if !matches!(joined.scheme(), "http" | "https") {
        return None;
    }
    joined.set_fragment(None);
    Some(joined.to_string())
}

pub(crate) fn dedup_preserving_order(urls: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    urls.into_iter().filter(|u| seen.insert(u.clone())).collect()
}

pub(crate) fn selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::Selector {
        selector: css.to_string(),
        message: e.to_string(),
    })
}

pub(crate) fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Text nodes trimmed and joined by single spaces.
pub(crate) fn joined_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn select_first_text(document: &Html, css: &str) -> Result<Option<String>, ExtractError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .next()
        .and_then(|n| text_or_none(joined_text(n))))
}

pub(crate) fn select_first_attr(
    document: &Html,
    css: &str,
    attr: &str,
) -> Result<Option<String>, ExtractError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string())))
}

/// Page heading, falling back to the Open Graph title.
pub(crate) fn title_or_og(document: &Html, heading: &str) -> Result<String, ExtractError> {
    Ok(select_first_text(document, heading)?
        .or(select_first_attr(document, r#"meta[property="og:title"]"#, "content")?)
        .unwrap_or_default())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_every_builtin_source() {
        for id in SOURCE_IDS {
            let extractor = extractor_for_source(id, None).unwrap();
            assert_eq!(extractor.source_id(), id);
            assert!(extractor.listing_url().starts_with("https://"));
        }
        assert!(extractor_for_source("rss", None).is_none());
        assert_eq!(all_extractors().len(), SOURCE_IDS.len());
    }

    #[test]
    fn listing_override_is_honoured() {
        let extractor = extractor_for_source("split", Some("http://localhost:9000/list")).unwrap();
        assert_eq!(extractor.listing_url(), "http://localhost:9000/list");
    }

    #[test]
    fn every_source_publishes_under_a_stable_placeholder() {
        for id in SOURCE_IDS {
            let a = extractor_for_source(id, None).unwrap().organisation();
            let b = extractor_for_source(id, None).unwrap().organisation();
            assert_eq!(a, b);
            assert_eq!(a.identifier.len(), stipendify_core::IDENTIFIER_LEN);
        }
    }

    #[test]
    fn resolve_handles_relative_and_foreign_links() {
        let base = Url::parse("https://gov.sibenik.hr/").unwrap();
        assert_eq!(
            resolve(&base, "../dokumenti/natjecaj.pdf").as_deref(),
            Some("https://gov.sibenik.hr/dokumenti/natjecaj.pdf")
        );
        assert_eq!(
            resolve(&base, "/stranice/1.html#top").as_deref(),
            Some("https://gov.sibenik.hr/stranice/1.html")
        );
        assert!(resolve(&base, "mailto:info@sibenik.hr").is_none());
    }

    #[test]
    fn site_root_drops_the_listing_path() {
        let root = site_root("https://zagreb.hr/stipendije-grada-zagreba/175198").unwrap();
        assert_eq!(
            resolve(&root, "stipendija-grada-zagreba-za-2026/1").as_deref(),
            Some("https://zagreb.hr/stipendija-grada-zagreba-za-2026/1")
        );
    }

    #[test]
    fn dedup_keeps_first_seen_order() {
        let urls = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(dedup_preserving_order(urls), vec!["b", "a"]);
    }
}
