use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::Html;
use stipendify_core::{ImportantDates, OrganisationCandidate, ScholarshipCandidate};
use stipendify_storage::HttpFetcher;
use tracing::debug;
use url::Url;

use crate::normalize::{amounts_in_range, categorize, duration_months, STIPEND_EUR};
use crate::{
    dedup_preserving_order, fetch_html, resolve, select_first_text, selector, site_root,
    title_or_og, ExtractContext, ExtractError, SourceExtractor,
};

pub const LISTING_URL: &str = "https://zagreb.hr/stipendije-grada-zagreba/175198";

static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{2,3}(?:[.,]\d{2})?)\s*eura").expect("static zagreb amount regex")
});

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:na|traje)\s+(\d+)\s+mjesec").expect("static zagreb duration regex")
});

#[derive(Debug, Clone)]
pub struct ZagrebExtractor {
    listing_url: String,
}

impl ZagrebExtractor {
    pub fn new(listing_url: Option<String>) -> Self {
        Self {
            listing_url: listing_url.unwrap_or_else(|| LISTING_URL.to_string()),
        }
    }

    pub fn discover_links(base: &Url, html: &str) -> Result<Vec<String>, ExtractError> {
        let document = Html::parse_document(html);
        let anchors = selector("a[href]")?;
        let links = document
            .select(&anchors)
            .filter_map(|a| a.value().attr("href"))
            .filter(|href| href.contains("stipendija-grada-zagreba"))
            .filter_map(|href| resolve(base, href))
            .collect();
        Ok(dedup_preserving_order(links))
    }

    pub fn parse_detail(url: &str, html: &str) -> Result<ScholarshipCandidate, ExtractError> {
        let document = Html::parse_document(html);
        let title = title_or_og(&document, "h1")?;
        let details = select_first_text(&document, "div.opis")?.unwrap_or_default();

        let mut candidate = ScholarshipCandidate::new(title, url);
        let amounts = amounts_in_range(&details, &[&*AMOUNT], &STIPEND_EUR);
        if let Some(max) = amounts.last() {
            candidate.value = Some(*max);
            candidate.currency = Some("EUR".to_string());
        }
        candidate.duration_months = duration_months(&details, &DURATION);
        candidate.categories = categorize(&candidate.title, &details);
        candidate.important_dates = ImportantDates {
            published: select_first_text(&document, "div.datum")?,
            ..Default::default()
        };
        candidate.description = details;
        Ok(candidate)
    }
}

#[async_trait]
impl SourceExtractor for ZagrebExtractor {
    fn source_id(&self) -> &'static str {
        "zagreb"
    }

    fn organisation(&self) -> OrganisationCandidate {
        OrganisationCandidate::unregistered("Grad Zagreb", "Trg Stjepana Radića 1, Zagreb")
    }

    fn listing_url(&self) -> &str {
        &self.listing_url
    }

    async fn discover(
        &self,
        http: &HttpFetcher,
        ctx: &ExtractContext,
    ) -> Result<Vec<String>, ExtractError> {
        let html = fetch_html(http, ctx, self.source_id(), &self.listing_url).await?;
        let links = Self::discover_links(&site_root(&self.listing_url)?, &html)?;
        debug!(source_id = self.source_id(), links = links.len(), "discovered");
        Ok(links)
    }

    async fn extract(
        &self,
        http: &HttpFetcher,
        ctx: &ExtractContext,
        detail_url: &str,
    ) -> Result<ScholarshipCandidate, ExtractError> {
        let html = fetch_html(http, ctx, self.source_id(), detail_url).await?;
        Self::parse_detail(detail_url, &html)
    }
}
