//! Shared heuristics for amounts, categories, durations and dates found in
//! free text on municipal pages and in PDF notices.

use std::ops::RangeInclusive;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use stipendify_core::{Category, ImportantDates};

/// Any positive amount.
pub const ANY_AMOUNT: RangeInclusive<f64> = f64::MIN_POSITIVE..=f64::MAX;

/// Plausible monthly stipend in euro; everything else on a notice is usually
/// a phone number, a year or a total budget.
pub const MONTHLY_EUR: RangeInclusive<f64> = 80.0..=600.0;

/// Looser bound for pages that mix monthly and yearly figures.
pub const STIPEND_EUR: RangeInclusive<f64> = 20.0..=2000.0;

const NUMBER: &str = r"\d+(?:[.,]\d{3})*(?:[.,]\d+)?";
const CURRENCY: &str = r"(?:(?:eura|euro|eur|kuna|kune|kuni|kunu|kn|hrk|usd|gbp)\b|[€$£])";

static RANGE_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)od\s*({NUMBER})\s*(?:do|-)\s*({NUMBER})\s*({CURRENCY})"
    ))
    .expect("static range regex")
});

static PHRASE_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(?:u iznosu od|u iznosu|iznosi|iznos|dodijeljen[ao]?|dodijeljeno|najviše|najvise|do iznosa|do)\s*:?.{{0,80}}?({NUMBER})\s*({CURRENCY})"
    ))
    .expect("static phrase regex")
});

static NUMBER_THEN_CURRENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)({NUMBER})\s*({CURRENCY})")).expect("static amount regex")
});

static CURRENCY_THEN_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)({CURRENCY})\s*({NUMBER})")).expect("static amount regex")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static whitespace regex"));

static TIME_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2}:\d{2})\s*h\b").expect("static time regex"));

static COMMA_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*(\d{1,2}:\d{2})").expect("static time regex"));

static FREE_DATE_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)od\s+(\d{1,2}\.\d{1,2}\.\d{4}).*?do\s+(\d{1,2}\.\d{1,2}\.\d{4})")
        .expect("static date range regex")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountMatch {
    pub value: f64,
    /// Currency token exactly as written on the page.
    pub currency: String,
    pub raw: String,
}

impl AmountMatch {
    /// ISO code for the matched token.
    pub fn currency_code(&self) -> &'static str {
        currency_code(&self.currency)
    }
}

pub fn currency_code(token: &str) -> &'static str {
    match token.trim().to_lowercase().as_str() {
        "€" | "eur" | "euro" | "eura" => "EUR",
        "kn" | "kuna" | "kune" | "kuni" | "kunu" | "hrk" => "HRK",
        "$" | "usd" => "USD",
        "£" | "gbp" => "GBP",
        _ => "EUR",
    }
}

/// Parses a numeric token written with either decimal convention.
///
/// With both `.` and `,` present the first kind groups thousands and the
/// last kind is the decimal point. A single kind is a decimal point, except
/// when it repeats or when exactly three digits follow a lone occurrence,
/// which is how thousands are grouped on Croatian pages (`1.500 kn`).
pub fn normalize_number(token: &str) -> Option<f64> {
    let compact: String = token
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();
    if compact.is_empty() {
        return None;
    }

    let first_dot = compact.find('.');
    let first_comma = compact.find(',');
    let normalized = match (first_dot, first_comma) {
        (Some(dot), Some(comma)) => {
            let (thousands, decimal) = if dot < comma { ('.', ',') } else { (',', '.') };
            compact
                .chars()
                .filter(|c| *c != thousands)
                .map(|c| if c == decimal { '.' } else { c })
                .collect::<String>()
        }
        (Some(_), None) => single_separator(&compact, '.'),
        (None, Some(_)) => single_separator(&compact, ','),
        (None, None) => compact,
    };
    normalized.parse::<f64>().ok()
}

fn single_separator(token: &str, sep: char) -> String {
    let parts: Vec<&str> = token.split(sep).collect();
    let grouped = parts.len() > 2
        || (parts.len() == 2 && parts[1].len() == 3 && (1..=3).contains(&parts[0].len()));
    if grouped {
        parts.concat()
    } else {
        token.replace(sep, ".")
    }
}

/// Most prominent amount in `text` with no plausibility bound.
pub fn parse_amount(text: &str) -> Option<AmountMatch> {
    parse_amount_within(text, &ANY_AMOUNT)
}

/// Tries the explicit range, then phrase-anchored amounts, then bare
/// number/currency adjacency. The first stage that yields an in-bound value
/// wins and its largest value is returned.
pub fn parse_amount_within(text: &str, bounds: &RangeInclusive<f64>) -> Option<AmountMatch> {
    let ranges = RANGE_AMOUNT.captures_iter(text).filter_map(|caps| {
        let upper = normalize_number(caps.get(2)?.as_str())?;
        Some(AmountMatch {
            value: upper,
            currency: caps.get(3)?.as_str().to_string(),
            raw: caps.get(0)?.as_str().to_string(),
        })
    });
    if let Some(found) = best_within(ranges, bounds) {
        return Some(found);
    }

    let phrases = PHRASE_AMOUNT.captures_iter(text).filter_map(|caps| {
        Some(AmountMatch {
            value: normalize_number(caps.get(1)?.as_str())?,
            currency: caps.get(2)?.as_str().to_string(),
            raw: caps.get(0)?.as_str().to_string(),
        })
    });
    if let Some(found) = best_within(phrases, bounds) {
        return Some(found);
    }

    let trailing = NUMBER_THEN_CURRENCY.captures_iter(text).filter_map(|caps| {
        Some(AmountMatch {
            value: normalize_number(caps.get(1)?.as_str())?,
            currency: caps.get(2)?.as_str().to_string(),
            raw: caps.get(0)?.as_str().to_string(),
        })
    });
    let leading = CURRENCY_THEN_NUMBER.captures_iter(text).filter_map(|caps| {
        Some(AmountMatch {
            value: normalize_number(caps.get(2)?.as_str())?,
            currency: caps.get(1)?.as_str().to_string(),
            raw: caps.get(0)?.as_str().to_string(),
        })
    });
    best_within(trailing.chain(leading), bounds)
}

fn best_within(
    matches: impl Iterator<Item = AmountMatch>,
    bounds: &RangeInclusive<f64>,
) -> Option<AmountMatch> {
    matches
        .filter(|m| bounds.contains(&m.value))
        .max_by(|a, b| a.value.total_cmp(&b.value))
}

/// Sorted distinct values captured by group 1 of any of `patterns`.
pub fn amounts_in_range(text: &str, patterns: &[&Regex], bounds: &RangeInclusive<f64>) -> Vec<f64> {
    let mut out: Vec<f64> = patterns
        .iter()
        .flat_map(|re| re.captures_iter(text))
        .filter_map(|caps| normalize_number(caps.get(1)?.as_str()))
        .filter(|v| bounds.contains(v))
        .collect();
    out.sort_by(f64::total_cmp);
    out.dedup();
    out
}

/// Substring vocabulary match on title and details; `Student` when nothing hits.
pub fn categorize(title: &str, details: &str) -> Vec<Category> {
    let text = format!("{title} {details}").to_lowercase();
    let vocabulary: [(Category, &[&str]); 4] = [
        (Category::Pupil, &["učenik", "učenic", "ucenik", "ucenic"]),
        (Category::Student, &["student"]),
        (Category::Athlete, &["sportaš", "sportas"]),
        (Category::Minority, &["manjin"]),
    ];
    let found: Vec<Category> = vocabulary
        .iter()
        .filter(|(_, terms)| terms.iter().any(|t| text.contains(t)))
        .map(|(category, _)| *category)
        .collect();
    if found.is_empty() {
        vec![Category::Student]
    } else {
        found
    }
}

pub fn duration_months(text: &str, pattern: &Regex) -> Option<u32> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .filter(|months| *months > 0)
}

/// Free-text "od DATE ... do DATE" window. Fields are left unset when absent.
pub fn date_range(text: &str) -> ImportantDates {
    let mut dates = ImportantDates::default();
    if let Some(caps) = FREE_DATE_RANGE.captures(text) {
        dates.apply_from = caps.get(1).map(|m| m.as_str().to_string());
        dates.apply_until = caps.get(2).map(|m| m.as_str().to_string());
    }
    dates
}

/// Collapses whitespace and drops the `h` some pages append to clock times.
pub fn clean_text(text: &str) -> String {
    let collapsed = WHITESPACE.replace_all(text.trim(), " ");
    let without_suffix = TIME_SUFFIX.replace_all(&collapsed, "$1");
    COMMA_TIME
        .replace_all(&without_suffix, ", $1")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_takes_upper_bound_and_currency_token() {
        let found = parse_amount("iznos od 500 do 1.500 kn").unwrap();
        assert_eq!(found.value, 1500.0);
        assert_eq!(found.currency, "kn");
        assert_eq!(found.currency_code(), "HRK");
    }

    #[test]
    fn mixed_separators_use_last_as_decimal_point() {
        let found = parse_amount("1.500,50 EUR").unwrap();
        assert_eq!(found.value, 1500.50);
        assert_eq!(normalize_number("1,500.50"), Some(1500.50));
    }

    #[test]
    fn implausible_amount_is_rejected() {
        assert!(parse_amount_within("50000 EUR", &MONTHLY_EUR).is_none());
        assert!(parse_amount("50000 EUR").is_some());
    }

    #[test]
    fn lone_separator_is_decimal_unless_grouping_thousands() {
        assert_eq!(normalize_number("150,50"), Some(150.5));
        assert_eq!(normalize_number("1500.5"), Some(1500.5));
        assert_eq!(normalize_number("1.500"), Some(1500.0));
        assert_eq!(normalize_number("1.250.000"), Some(1_250_000.0));
        assert_eq!(normalize_number("1 500"), Some(1500.0));
        assert_eq!(normalize_number(""), None);
    }

    #[test]
    fn neighbouring_numbers_are_not_grouped() {
        let text = "Za akademsku godinu 2026 500 eura mjesečno";
        assert_eq!(parse_amount(text).unwrap().value, 500.0);
        assert_eq!(parse_amount_within(text, &STIPEND_EUR).unwrap().value, 500.0);
    }

    #[test]
    fn phrase_beats_bare_adjacency() {
        let text = "Kotizacija 20 EUR. Stipendija se dodjeljuje u iznosu od 300,00 eura mjesečno.";
        let found = parse_amount(text).unwrap();
        assert_eq!(found.value, 300.0);
        assert_eq!(found.currency, "eura");
    }

    #[test]
    fn currency_before_number_is_recognised() {
        let found = parse_amount("Ukupno: € 250").unwrap();
        assert_eq!(found.value, 250.0);
        assert_eq!(found.currency_code(), "EUR");
    }

    #[test]
    fn words_starting_with_currency_letters_are_not_currency() {
        assert!(parse_amount("Prijavilo se 120 knjižnica").is_none());
    }

    #[test]
    fn amounts_in_range_are_sorted_and_distinct() {
        let re = Regex::new(r"(\d{1,4}(?:[.,]\d{2})?)\s*EUR").unwrap();
        let text = "300,00 EUR, 150 EUR, 300 EUR, 9000 EUR";
        assert_eq!(amounts_in_range(text, &[&re], &MONTHLY_EUR), vec![150.0, 300.0]);
    }

    #[test]
    fn categories_default_to_student() {
        assert_eq!(categorize("Natječaj", "za dodjelu stipendija"), vec![Category::Student]);
        assert_eq!(
            categorize("Stipendije za učenike i studente", "sportaše pripadnike manjina"),
            vec![
                Category::Pupil,
                Category::Student,
                Category::Athlete,
                Category::Minority
            ]
        );
    }

    #[test]
    fn duration_is_optional() {
        let re = Regex::new(r"(?i)(?:na|traje)\s+(\d+)\s+mjesec").unwrap();
        assert_eq!(duration_months("Stipendija se dodjeljuje na 10 mjeseci", &re), Some(10));
        assert_eq!(duration_months("Bez trajanja", &re), None);
    }

    #[test]
    fn date_range_is_partial() {
        let dates = date_range("Prijave su otvorene od 1.10.2026. do 31.10.2026.");
        assert_eq!(dates.apply_from.as_deref(), Some("1.10.2026"));
        assert_eq!(dates.apply_until.as_deref(), Some("31.10.2026"));
        assert!(date_range("Rok nije objavljen").is_empty());
    }

    #[test]
    fn clean_text_strips_clock_suffix() {
        assert_eq!(clean_text("  15.10.2026,   12:00 h "), "15.10.2026, 12:00");
        assert_eq!(clean_text("Natječaj\n\n za  stipendije"), "Natječaj za stipendije");
        assert_eq!(clean_text("Stipendije svih"), "Stipendije svih");
    }
}
