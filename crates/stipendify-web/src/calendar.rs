use chrono::NaiveDate;

pub const CALENDAR_BASE: &str = "https://calendar.google.com/calendar/render";
pub const CALENDAR_TIMEZONE: &str = "Europe/Zagreb";
pub const DESCRIPTION_WIDTH: usize = 240;
const PLACEHOLDER: &str = "...";

/// All-day calendar event link. Pure; the query is form-urlencoded.
pub fn calendar_url(name: &str, description: &str, date: NaiveDate) -> String {
    let day = date.format("%Y%m%d").to_string();
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("action", "TEMPLATE")
        .append_pair("text", name)
        .append_pair("details", description)
        .append_pair("dates", &format!("{day}/{day}"))
        .append_pair("ctz", CALENDAR_TIMEZONE)
        .finish();
    format!("{CALENDAR_BASE}?{query}")
}

/// Collapses whitespace and, when longer than `width`, keeps whole words and
/// appends `...` so the result stays within `width` characters.
pub fn shorten(text: &str, width: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }
    let budget = width.saturating_sub(PLACEHOLDER.len());
    let mut out = String::new();
    let mut used = 0;
    for word in collapsed.split(' ') {
        let len = word.chars().count();
        let extra = if out.is_empty() { len } else { len + 1 };
        if used + extra > budget {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
        used += extra;
    }
    out.push_str(PLACEHOLDER);
    out
}

pub fn event_name(scholarship_name: &str) -> String {
    format!("[Stipendify] {scholarship_name}")
}

pub fn event_description(description: &str, public_url: &str) -> String {
    format!(
        "Stipendify reminder:\n{}\n\n{public_url}",
        shorten(description, DESCRIPTION_WIDTH)
    )
}

/// Reads the day out of a raw page date such as `31.10.2026.`,
/// `31.10.2026., 15:00` or `2026-10-31`.
pub fn parse_page_date(raw: &str) -> Option<NaiveDate> {
    let head = raw.trim().split([',', ' ']).next()?.trim_end_matches('.');
    NaiveDate::parse_from_str(head, "%d.%m.%Y")
        .or_else(|_| NaiveDate::parse_from_str(head, "%Y-%m-%d"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_form_encoded_with_all_day_dates() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 31).unwrap();
        let url = calendar_url("ZG stipendija", "stipendija grada Zagreba", date);
        assert_eq!(
            url,
            "https://calendar.google.com/calendar/render?action=TEMPLATE&text=ZG+stipendija\
             &details=stipendija+grada+Zagreba&dates=20261031%2F20261031&ctz=Europe%2FZagreb"
        );
    }

    #[test]
    fn non_ascii_and_newlines_are_percent_encoded() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let url = calendar_url("Šibenik", "a\nb", date);
        assert!(url.contains("text=%C5%A0ibenik"));
        assert!(url.contains("details=a%0Ab"));
    }

    #[test]
    fn shorten_keeps_short_text_and_cuts_on_words() {
        assert_eq!(shorten("  kratki   opis ", 240), "kratki opis");
        assert_eq!(shorten("jedan dva tri četiri", 12), "jedan dva...");
        let long = "riječ ".repeat(100);
        let cut = shorten(&long, DESCRIPTION_WIDTH);
        assert!(cut.chars().count() <= DESCRIPTION_WIDTH);
        assert!(cut.ends_with("riječ..."));
    }

    #[test]
    fn description_ends_with_public_url() {
        let text = event_description("Opis", "https://stipendify.tk0.eu");
        assert_eq!(text, "Stipendify reminder:\nOpis\n\nhttps://stipendify.tk0.eu");
    }

    #[test]
    fn page_dates_in_local_and_iso_forms() {
        let expected = NaiveDate::from_ymd_opt(2026, 10, 31);
        assert_eq!(parse_page_date("31.10.2026."), expected);
        assert_eq!(parse_page_date("31.10.2026., 15:00"), expected);
        assert_eq!(parse_page_date("2026-10-31"), expected);
        assert_eq!(parse_page_date("uskoro"), None);
    }
}
