use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use stipendify_core::{ImportantDates, OrganisationCandidate, ScholarshipCandidate};
use stipendify_storage::HttpFetcher;
use tracing::{debug, warn};
use url::Url;

use crate::normalize::{amounts_in_range, categorize, clean_text, date_range, MONTHLY_EUR};
use crate::pdf::{looks_like_pdf, pdf_text};
use crate::{
    dedup_preserving_order, joined_text, resolve, selector, site_root, ExtractContext,
    ExtractError, SourceExtractor,
};

pub const LISTING_URL: &str = "https://gov.sibenik.hr/stranice/stipendije/135.html";

const LIST_PAGE_MARKERS: [&str; 4] = [
    "lista kandidata",
    "rang lista",
    "privremena lista",
    "konačna lista",
];

const LIST_DOCUMENT_MARKERS: [&str; 3] = ["lista", "popis", "rezultat"];

static PDF_AMOUNTS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        r"(?i)(?:stipendij[ae]|iznos).*?(\d{1,4}[.,]\d{2})\s*(?:EUR|eura|€)",
        r"(?i)(?:stipendij[ae]|iznos).*?(\d{1,4})\s*(?:EUR|eura|€)",
        r"(?i)(\d{1,4}[.,]\d{2})\s*(?:EUR|eura|€)\s*(?:mjesečno|godišnje)",
        r"(?i)(\d{1,4})\s*(?:EUR|eura|€)\s*(?:mjesečno|godišnje)",
    ]
    .map(|p| Regex::new(p).expect("static sibenik pdf amount regex"))
});

static TEXT_AMOUNTS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        r"(?i)(?:stipendij[ae]|iznos).*?(\d{2,3}[.,]\d{2})\s*(?:EUR|eura|€)",
        r"(?i)(?:stipendij[ae]|iznos).*?(\d{2,3})\s*(?:EUR|eura|€)",
        r"(?i)(\d{2,3}[.,]\d{2})\s*(?:EUR|eura|€)\s*(?:mjesečno|godišnje)",
        r"(?i)(\d{2,3})\s*(?:EUR|eura|€)\s*(?:mjesečno|godišnje)",
    ]
    .map(|p| Regex::new(p).expect("static sibenik text amount regex"))
});

/// A parsed detail page plus the notice documents it links to.
#[derive(Debug, Clone, PartialEq)]
pub struct SibenikDetail {
    pub candidate: ScholarshipCandidate,
    pub pdf_links: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SibenikExtractor {
    listing_url: String,
}

fn first_clean_text(document: &Html, css: &str) -> Result<Option<String>, ExtractError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .next()
        .map(|el| clean_text(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty()))
}

fn bold_value(card: ElementRef<'_>, bold: &Selector) -> Option<String> {
    card.select(bold)
        .next()
        .map(|b| clean_text(&b.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

/// "Datum objave" lives in the first bordered card; "Datum isteka" in any.
fn labelled_dates(document: &Html) -> Result<ImportantDates, ExtractError> {
    let cards = selector("div.card-body.border-bottom")?;
    let bold = selector("b")?;
    let mut dates = ImportantDates::default();

    if let Some(first) = document.select(&cards).next() {
        if first.text().collect::<String>().contains("Datum objave") {
            dates.published = bold_value(first, &bold);
        }
    }
    dates.expires = document
        .select(&cards)
        .filter(|card| card.text().collect::<String>().contains("Datum isteka"))
        .find_map(|card| bold_value(card, &bold));
    Ok(dates)
}

fn status(document: &Html) -> Result<Option<String>, ExtractError> {
    let body = selector("div.card-body")?;
    let Some(card) = document.select(&body).next() else {
        return Ok(None);
    };
    for css in ["span.red-text", "span.green-text"] {
        let sel = selector(css)?;
        if let Some(span) = card.select(&sel).next() {
            let text = clean_text(&span.text().collect::<String>());
            if !text.is_empty() {
                return Ok(Some(text));
            }
        }
    }
    Ok(None)
}

fn details(document: &Html) -> Result<String, ExtractError> {
    let paragraphs = selector("div.card-body p")?;
    Ok(document
        .select(&paragraphs)
        .map(|p| clean_text(&p.text().collect::<String>()))
        .filter(|text| text.chars().count() > 20)
        .collect::<Vec<_>>()
        .join("\n\n"))
}

impl SibenikExtractor {
    pub fn new(listing_url: Option<String>) -> Self {
        Self {
            listing_url: listing_url.unwrap_or_else(|| LISTING_URL.to_string()),
        }
    }

    pub fn discover_links(base: &Url, html: &str) -> Result<Vec<String>, ExtractError> {
        let document = Html::parse_document(html);
        let cards = selector("div.card-body.border-bottom")?;
        let anchors = selector("a[href]")?;

        let mut links = Vec::new();
        for card in document.select(&cards) {
            let Some(anchor) = card.select(&anchors).next() else {
                continue;
            };
            let text = joined_text(anchor).to_lowercase();
            if LIST_PAGE_MARKERS.iter().any(|m| text.contains(m)) || !text.contains("natječaj") {
                continue;
            }
            if let Some(url) = anchor.value().attr("href").and_then(|h| resolve(base, h)) {
                links.push(url);
            }
        }
        Ok(dedup_preserving_order(links))
    }

    pub fn parse_detail(base: &Url, url: &str, html: &str) -> Result<SibenikDetail, ExtractError> {
        let document = Html::parse_document(html);
        let title = match first_clean_text(&document, "h3.font-weight-bold.text-uppercase")? {
            Some(t) => t,
            None => match first_clean_text(&document, "h5.font-weight-bold")? {
                Some(t) => t,
                None => {
                    let og = selector(r#"meta[property="og:title"]"#)?;
                    document
                        .select(&og)
                        .next()
                        .and_then(|m| m.value().attr("content"))
                        .map(clean_text)
                        .unwrap_or_default()
                }
            },
        };

        let details = details(&document)?;
        let mut dates = labelled_dates(&document)?;
        let page_text = document.root_element().text().collect::<String>();
        let window = date_range(&page_text);
        dates.apply_from = window.apply_from;
        dates.apply_until = window.apply_until;

        let mut candidate = ScholarshipCandidate::new(title, url);
        candidate.status = status(&document)?;
        candidate.categories = categorize(&candidate.title, &details);
        candidate.important_dates = dates;
        candidate.description = details;

        Ok(SibenikDetail {
            candidate,
            pdf_links: Self::pdf_links(base, &document)?,
        })
    }

    /// Notice documents, excluding candidate and result lists.
    fn pdf_links(base: &Url, document: &Html) -> Result<Vec<String>, ExtractError> {
        let anchors = selector("a[href]")?;
        let links = document
            .select(&anchors)
            .filter(|a| {
                let text = joined_text(*a).to_lowercase();
                !LIST_DOCUMENT_MARKERS.iter().any(|m| text.contains(m))
            })
            .filter_map(|a| a.value().attr("href"))
            .filter(|href| href.to_lowercase().ends_with(".pdf"))
            .filter_map(|href| resolve(base, href))
            .collect();
        Ok(dedup_preserving_order(links))
    }

    /// Sorted distinct plausible amounts found in notice text.
    pub fn pdf_amounts(text: &str) -> Vec<f64> {
        let patterns: Vec<&Regex> = PDF_AMOUNTS.iter().collect();
        amounts_in_range(text, &patterns, &MONTHLY_EUR)
    }

    pub fn detail_amounts(text: &str) -> Vec<f64> {
        let patterns: Vec<&Regex> = TEXT_AMOUNTS.iter().collect();
        amounts_in_range(text, &patterns, &MONTHLY_EUR)
    }

    /// Notices list one monthly amount per tier (pupils, students, deficit
    /// programmes); a scholarship row holds a single value, so it carries the
    /// top tier, the same way range amounts resolve to their upper bound.
    pub fn stipend_value(amounts: &[f64]) -> Option<f64> {
        amounts.iter().copied().max_by(f64::total_cmp)
    }

    async fn first_pdf_amounts(
        &self,
        http: &HttpFetcher,
        ctx: &ExtractContext,
        pdf_url: &str,
    ) -> Result<Vec<f64>, ExtractError> {
        let resp = http
            .fetch_bytes(ctx.run_id, self.source_id(), pdf_url)
            .await
            .map_err(|source| ExtractError::Fetch {
                url: pdf_url.to_string(),
                source,
            })?;
        if !looks_like_pdf(&resp.body) {
            return Err(ExtractError::Pdf(format!("{pdf_url} is not a pdf document")));
        }
        let body = resp.body;
        let text = tokio::task::spawn_blocking(move || pdf_text(&body))
            .await
            .map_err(|e| ExtractError::Pdf(e.to_string()))??;
        Ok(Self::pdf_amounts(&text))
    }
}

#[async_trait]
impl SourceExtractor for SibenikExtractor {
    fn source_id(&self) -> &'static str {
        "sibenik"
    }

    fn organisation(&self) -> OrganisationCandidate {
        OrganisationCandidate::unregistered("Grad Šibenik", "Trg palih branitelja Domovinskog rata 1, Šibenik")
    }

    fn listing_url(&self) -> &str {
        &self.listing_url
    }

    async fn discover(
        &self,
        http: &HttpFetcher,
        ctx: &ExtractContext,
    ) -> Result<Vec<String>, ExtractError> {
        let html = crate::fetch_html(http, ctx, self.source_id(), &self.listing_url).await?;
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
        let html = crate::fetch_html(http, ctx, self.source_id(), detail_url).await?;
        let base = site_root(&self.listing_url)?;
        let SibenikDetail {
            mut candidate,
            pdf_links,
        } = Self::parse_detail(&base, detail_url, &html)?;

        let mut amounts = Vec::new();
        if let Some(pdf_url) = pdf_links.first() {
            match self.first_pdf_amounts(http, ctx, pdf_url).await {
                Ok(found) => amounts = found,
                Err(err) => warn!(
                    source_id = self.source_id(),
                    url = %pdf_url,
                    error = %err,
                    "pdf skipped"
                ),
            }
        }
        if amounts.is_empty() {
            amounts = Self::detail_amounts(&candidate.description);
        }
        if let Some(value) = Self::stipend_value(&amounts) {
            candidate.value = Some(value);
            candidate.currency = Some("EUR".to_string());
        }
        Ok(candidate)
    }
}
