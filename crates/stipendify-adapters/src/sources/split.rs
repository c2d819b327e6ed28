use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::Html;
use stipendify_core::{OrganisationCandidate, ScholarshipCandidate};
use stipendify_storage::HttpFetcher;
use tracing::debug;
use url::Url;

use crate::normalize::{amounts_in_range, categorize, date_range, duration_months, STIPEND_EUR};
use crate::{
    dedup_preserving_order, fetch_html, resolve, select_first_text, selector, site_root,
    title_or_og, ExtractContext, ExtractError, SourceExtractor,
};

pub const LISTING_URL: &str =
    "https://split.hr/natjecaji-i-oglasi/pid/5936/searchid/5937/cfs/true/edncfddlnc_55/1222";

/// Content containers in the order the site's templates have used them.
const DETAIL_CONTAINERS: [&str; 5] = [
    "div.user-content",
    "div.edn_articleContent",
    "div.article-content",
    "article",
    "main",
];

static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{2,3}(?:[.,]\d{2})?)\s*(?:eura|€|EUR)").expect("static split amount regex")
});

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:na|traje|razdoblje od)\s+(\d+)\s+mjesec")
        .expect("static split duration regex")
});

static APPLICATIONS_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Prijave na natječaj traju od\s+(\d{1,2}\.\d{1,2}\.\d{4})")
        .expect("static split date regex")
});

#[derive(Debug, Clone)]
pub struct SplitExtractor {
    listing_url: String,
}

impl SplitExtractor {
    pub fn new(listing_url: Option<String>) -> Self {
        Self {
            listing_url: listing_url.unwrap_or_else(|| LISTING_URL.to_string()),
        }
    }

    pub fn discover_links(base: &Url, html: &str) -> Result<Vec<String>, ExtractError> {
        let document = Html::parse_document(html);
        let articles = selector("article.l-item")?;
        let overlay = selector("a.o-link--overlay")?;

        let links = document
            .select(&articles)
            .filter_map(|article| article.select(&overlay).next())
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| resolve(base, href))
            .filter(|url| {
                let lower = url.to_lowercase();
                lower.contains("stipendij") || lower.contains("natjecaj")
            })
            .collect();
        Ok(dedup_preserving_order(links))
    }

    pub fn parse_detail(url: &str, html: &str) -> Result<ScholarshipCandidate, ExtractError> {
        let document = Html::parse_document(html);
        let title = title_or_og(&document, "h1")?;

        let mut details = String::new();
        for css in DETAIL_CONTAINERS {
            if let Some(text) = select_first_text(&document, css)? {
                details = text;
                break;
            }
        }

        let page_text = document.root_element().text().collect::<String>();
        let opens = match select_first_text(&document, "div.prijave b")? {
            Some(date) => Some(date),
            None => APPLICATIONS_OPEN
                .captures(&page_text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string()),
        };

        let mut candidate = ScholarshipCandidate::new(title, url);
        let amounts = amounts_in_range(&details, &[&*AMOUNT], &STIPEND_EUR);
        if let Some(max) = amounts.last() {
            candidate.value = Some(*max);
            candidate.currency = Some("EUR".to_string());
        }
        candidate.duration_months = duration_months(&details, &DURATION);
        candidate.categories = categorize(&candidate.title, &details);
        candidate.important_dates = date_range(&details);
        candidate.important_dates.applications_open = opens;
        candidate.description = details;
        Ok(candidate)
    }
}

#[async_trait]
impl SourceExtractor for SplitExtractor {
    fn source_id(&self) -> &'static str {
        "split"
    }

    fn organisation(&self) -> OrganisationCandidate {
        OrganisationCandidate::unregistered("Grad Split", "Obala kneza Branimira 17, Split")
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

#[cfg(test)]
mod tests {
    use stipendify_core::Category;

    use super::*;
    use crate::test_support::fixture;

    #[test]
    fn discovers_overlay_links_of_scholarship_articles() {
        let base = site_root(LISTING_URL).unwrap();
        let links = SplitExtractor::discover_links(&base, &fixture("split", "listing.html")).unwrap();
        assert_eq!(
            links,
            vec![
                "https://split.hr/natjecaji/natjecaj-za-dodjelu-stipendija-2026".to_string(),
                "https://split.hr/vijesti/stipendije-za-sportase".to_string(),
            ]
        );
    }

    #[test]
    fn parses_detail_fixture() {
        let url = "https://split.hr/natjecaji/natjecaj-za-dodjelu-stipendija-2026";
        let candidate = SplitExtractor::parse_detail(url, &fixture("split", "detail.html")).unwrap();
        assert_eq!(candidate.title, "Natječaj za dodjelu stipendija Grada Splita");
        assert_eq!(candidate.value, Some(250.0));
        assert_eq!(candidate.duration_months, Some(10));
        assert_eq!(candidate.important_dates.applications_open.as_deref(), Some("1.10.2026."));
        assert_eq!(candidate.important_dates.apply_from.as_deref(), Some("1.10.2026"));
        assert_eq!(candidate.important_dates.apply_until.as_deref(), Some("31.10.2026"));
        assert_eq!(
            candidate.categories,
            vec![Category::Pupil, Category::Student, Category::Athlete]
        );
    }

    #[test]
    fn falls_back_to_og_title_and_free_text_date() {
        let html = r#"<html><head><meta property="og:title" content="Stipendije 2026"></head>
            <body><main><p>Prijave na natječaj traju od 5.11.2026 do kraja mjeseca.</p></main></body></html>"#;
        let candidate = SplitExtractor::parse_detail("https://split.hr/x", html).unwrap();
        assert_eq!(candidate.title, "Stipendije 2026");
        assert_eq!(candidate.important_dates.applications_open.as_deref(), Some("5.11.2026"));
        assert!(candidate.description.starts_with("Prijave na natječaj"));
    }
}
