use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html};
use stipendify_core::{OrganisationCandidate, ScholarshipCandidate};
use stipendify_storage::HttpFetcher;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

use crate::normalize::{categorize, duration_months, parse_amount_within, STIPEND_EUR};
use crate::{
    dedup_preserving_order, fetch_html, joined_text, resolve, select_first_text, selector,
    site_root, title_or_og, ExtractContext, ExtractError, SourceExtractor,
};

pub const LISTING_URL: &str = "https://www.rijeka.hr/teme-za-gradane/odgoj-i-obrazovanje/stipendije/";
pub const AMOUNTS_URL: &str = "https://www.rijeka.hr/natjecaji-za-stipendije-grada-rijeke/";

static CATEGORY_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)prema kategoriji\s*(.+)").expect("static rijeka category regex")
});

static SCORING_CUTOFF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)boduj[eu]\s+se\s+prema").expect("static rijeka cutoff regex")
});

static CRITERIA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)kriterij").expect("static rijeka criteria regex"));

static CONDITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)uvjet").expect("static rijeka condition regex"));

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)razdoblje od\s+(\d+)\s+mjesec").expect("static rijeka duration regex")
});

/// One `h3` block of the shared amounts page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmountSection {
    pub heading: String,
    pub text: String,
}

/// A parsed detail page plus the category key used to look its amount up.
#[derive(Debug, Clone, PartialEq)]
pub struct RijekaDetail {
    pub candidate: ScholarshipCandidate,
    pub amount_category: Option<String>,
}

#[derive(Debug)]
pub struct RijekaExtractor {
    listing_url: String,
    amounts_url: String,
    amounts: OnceCell<Vec<AmountSection>>,
}

fn category_key(title: &str) -> Option<String> {
    CATEGORY_SUFFIX
        .captures(title)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_lowercase())
        .filter(|key| !key.is_empty())
}

/// Sections headed by a scholarship title, each with the paragraphs that
/// follow it up to the next heading. Eligibility sections are skipped.
pub fn parse_amounts_page(html: &str) -> Result<Vec<AmountSection>, ExtractError> {
    let document = Html::parse_document(html);
    let container = selector("div.user-content")?;
    let headings = selector("h3")?;
    let Some(content) = document.select(&container).next() else {
        return Ok(Vec::new());
    };

    let mut sections = Vec::new();
    for h3 in content.select(&headings) {
        let heading = joined_text(h3);
        let lower = heading.to_lowercase();
        if !lower.contains("stipendij") || lower.contains("uvjet") {
            continue;
        }
        let mut paragraphs = Vec::new();
        for sibling in h3.next_siblings().filter_map(ElementRef::wrap) {
            match sibling.value().name() {
                "h3" => break,
                "p" => paragraphs.push(joined_text(sibling)),
                _ => {}
            }
        }
        sections.push(AmountSection {
            heading,
            text: paragraphs.join(" "),
        });
    }
    Ok(sections)
}

/// Text of the section whose "prema kategoriji" suffix equals `category`.
pub fn matching_amount_text<'a>(sections: &'a [AmountSection], category: &str) -> Option<&'a str> {
    sections
        .iter()
        .find(|s| category_key(&s.heading).as_deref() == Some(category))
        .map(|s| s.text.as_str())
}

/// Conditions listed before the scoring rules, without criteria items.
fn conditions(content_html: &str) -> Result<Vec<String>, ExtractError> {
    let cut = SCORING_CUTOFF
        .find(content_html)
        .map_or(content_html, |m| &content_html[..m.start()]);
    let fragment = Html::parse_fragment(cut);
    let lists = selector("ul li")?;
    let paragraphs = selector("p")?;

    let mut out: Vec<String> = Vec::new();
    for li in fragment.select(&lists) {
        let item = joined_text(li).trim_end_matches('.').trim().to_string();
        if item.is_empty() || CRITERIA.is_match(&item) || out.contains(&item) {
            continue;
        }
        out.push(item);
    }
    for p in fragment.select(&paragraphs) {
        let text = joined_text(p);
        if CONDITION.is_match(&text) && text.split_whitespace().count() > 4 && !out.contains(&text) {
            out.push(text);
        }
    }
    Ok(out)
}

impl RijekaExtractor {
    pub fn new(listing_url: Option<String>) -> Self {
        Self {
            listing_url: listing_url.unwrap_or_else(|| LISTING_URL.to_string()),
            amounts_url: AMOUNTS_URL.to_string(),
            amounts: OnceCell::new(),
        }
    }

    pub fn with_amounts_url(mut self, amounts_url: impl Into<String>) -> Self {
        self.amounts_url = amounts_url.into();
        self
    }

    pub fn discover_links(base: &Url, html: &str) -> Result<Vec<String>, ExtractError> {
        let document = Html::parse_document(html);
        let anchors = selector("a[href]")?;
        let links = document
            .select(&anchors)
            .filter_map(|a| a.value().attr("href"))
            .filter(|href| href.contains("stipendiranje"))
            .filter_map(|href| resolve(base, href))
            .collect();
        Ok(dedup_preserving_order(links))
    }

    pub fn parse_detail(url: &str, html: &str) -> Result<RijekaDetail, ExtractError> {
        let document = Html::parse_document(html);
        let title = title_or_og(&document, "h1")?;
        let container = selector("div.user-content")?;
        let content = document.select(&container).next();
        let details = content.map(joined_text).unwrap_or_default();
        let requirements = match content {
            Some(el) => conditions(&el.inner_html())?,
            None => Vec::new(),
        };
        let page_title = select_first_text(&document, "div.page-title h1")?;

        let mut candidate = ScholarshipCandidate::new(title, url);
        candidate.duration_months = duration_months(&details, &DURATION);
        candidate.categories = categorize(&candidate.title, &details);
        candidate.requirements = requirements;
        candidate.description = details;

        Ok(RijekaDetail {
            candidate,
            amount_category: page_title.as_deref().and_then(category_key),
        })
    }

    /// Fills value and currency from the amounts page section for `category`.
    pub fn apply_amount(candidate: &mut ScholarshipCandidate, sections: &[AmountSection], category: &str) {
        let Some(text) = matching_amount_text(sections, category) else {
            return;
        };
        if let Some(found) = parse_amount_within(text, &STIPEND_EUR) {
            candidate.value = Some(found.value);
            candidate.currency = Some(found.currency_code().to_string());
        }
    }

    async fn amount_sections(
        &self,
        http: &HttpFetcher,
        ctx: &ExtractContext,
    ) -> Result<&[AmountSection], ExtractError> {
        let sections = self
            .amounts
            .get_or_try_init(|| async {
                let html = fetch_html(http, ctx, self.source_id(), &self.amounts_url).await?;
                parse_amounts_page(&html)
            })
            .await?;
        Ok(sections.as_slice())
    }
}

#[async_trait]
impl SourceExtractor for RijekaExtractor {
    fn source_id(&self) -> &'static str {
        "rijeka"
    }

    fn organisation(&self) -> OrganisationCandidate {
        OrganisationCandidate::unregistered("Grad Rijeka", "Korzo 16, Rijeka")
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
        let RijekaDetail {
            mut candidate,
            amount_category,
        } = Self::parse_detail(detail_url, &html)?;

        if let Some(category) = amount_category {
            match self.amount_sections(http, ctx).await {
                Ok(sections) => Self::apply_amount(&mut candidate, sections, &category),
                Err(err) => warn!(
                    source_id = self.source_id(),
                    url = %self.amounts_url,
                    error = %err,
                    "amounts page unavailable"
                ),
            }
        }
        Ok(candidate)
    }
}
