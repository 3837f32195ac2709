//! StepStone search results, one lead per hiring company.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use super::{absolutize, Enriched, Query, RenderedPage, Target};
use crate::config::{Search, StepstoneSettings};
use crate::record::{canonical_url, collapse_whitespace, Fields, KeyRule, Record, UNKNOWN};

pub const NAME: &str = "stepstone";
const ORIGIN: &str = "https://www.stepstone.de";
const COLUMNS: &[&str] = &["keyword", "location", "title", "company", "jobs", "profile", "url"];

static CARD: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("article[data-at='job-item']").unwrap());
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[data-testid='job-item-title']").unwrap());
static JOB_LINK: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a[data-testid='job-item-title'], [data-testid='job-item-title'] a").unwrap()
});
static COMPANY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[data-at='job-item-company-name']").unwrap());
static COMPANY_LINK: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("[data-at='job-item-company-name'] a[href*='companyUid=']").unwrap()
});
static PROFILE_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[data-at='company-logo']").unwrap());
static NEXT: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a[data-at='pagination-next'], a[aria-label*='Nächste'], a[rel='next']").unwrap()
});
const TOTAL_SELECTOR: &str = ".at-facet-header-total-results";
static TOTAL_EL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(TOTAL_SELECTOR).unwrap());

static UID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)companyUid=([0-9a-f\-]{16,})").unwrap());
static TOTAL_JSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)"(?:totalResultCount|totalResults|resultCount|totalJobs)"\s*:\s*(\d+)"#)
        .unwrap()
});
static TOTAL_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:Ergebnisse|Treffer)[^0-9]{0,40}(\d[\d.]*)").unwrap());

pub struct Stepstone {
    searches: Vec<Search>,
    enrich: bool,
    min_jobs: u32,
    max_jobs: u32,
}

impl Stepstone {
    pub fn new(settings: &StepstoneSettings) -> Self {
        Stepstone {
            searches: settings.searches.clone(),
            enrich: settings.enrich,
            min_jobs: settings.min_jobs,
            max_jobs: settings.max_jobs,
        }
    }
}

/// `Würzburg am Main` -> `wuerzburg-am-main`
pub fn slug_city(city: &str) -> String {
    let lower = city.trim().to_lowercase();
    let mut out = String::with_capacity(lower.len());
    for c in lower.chars() {
        match c {
            'ä' => out.push_str("ae"),
            'ö' => out.push_str("oe"),
            'ü' => out.push_str("ue"),
            'ß' => out.push_str("ss"),
            _ => out.push(c),
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join("-")
}

fn context_value<'a>(query: &'a Query, name: &str) -> &'a str {
    query
        .context
        .iter()
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.as_str())
        .unwrap_or_default()
}

impl Target for Stepstone {
    fn name(&self) -> &str {
        NAME
    }

    fn columns(&self) -> &[&'static str] {
        COLUMNS
    }

    fn key_rule(&self) -> KeyRule {
        KeyRule::NormalizedText("company")
    }

    fn queries(&self) -> Vec<Query> {
        self.searches
            .iter()
            .map(|s| Query {
                id: format!("{}:{}:{}:{}", NAME, s.keyword, slug_city(&s.city), s.radius),
                context: vec![
                    ("keyword", s.keyword.clone()),
                    ("location", s.city.clone()),
                    ("radius", s.radius.to_string()),
                ],
            })
            .collect()
    }

    fn page_url(&self, query: &Query, page: u32) -> String {
        format!(
            "{}/jobs/{}/in-{}?radius={}&page={}&searchOrigin=Resultlist_top-search",
            ORIGIN,
            context_value(query, "keyword"),
            slug_city(context_value(query, "location")),
            context_value(query, "radius"),
            page
        )
    }

    fn ready_selector(&self) -> &str {
        "article[data-at='job-item'], [data-at='no-results'], [data-genesis-element='NO_RESULTS']"
    }

    fn consent_selector(&self) -> Option<&str> {
        Some("#ccmgt_explicit_accept")
    }

    fn extract(&self, page: &RenderedPage, query: &Query) -> Vec<Record> {
        let doc = Html::parse_document(&page.html);
        let mut records = Vec::new();
        for (i, card) in doc.select(&CARD).enumerate() {
            match parse_card(card, &page.url, query) {
                Some(r) => records.push(r),
                None => warn!(target_name = NAME, url = %page.url, card = i + 1, "job card without company skipped"),
            }
        }
        records
    }

    fn has_next_page(&self, html: &str) -> bool {
        let doc = Html::parse_document(html);
        let enabled = doc.select(&NEXT).any(|a| {
            a.value().attr("href").is_some() && a.value().attr("aria-disabled") != Some("true")
        });
        enabled
    }

    fn enrichment_url(&self, record: &Record) -> Option<String> {
        if !self.enrich {
            return None;
        }
        let profile = record.get("profile");
        if profile != UNKNOWN {
            return Some(profile.to_string());
        }
        let uid = record.get("company_uid");
        if uid != UNKNOWN {
            return Some(format!("{}/jobs/?companyUid={}", ORIGIN, uid));
        }
        Some(company_search_url(record))
    }

    fn fallback_enrichment_url(&self, record: &Record) -> Option<String> {
        let primary = self.enrichment_url(record)?;
        let search = company_search_url(record);
        (primary != search).then_some(search)
    }

    fn enrichment_ready_selector(&self) -> Option<&str> {
        Some(TOTAL_SELECTOR)
    }

    fn enrich(&self, record: &Record, html: &str) -> Enriched {
        let total = match parse_total(html) {
            Some(0) => return Enriched::Unresolved("zero open jobs listed".into()),
            Some(n) => n,
            None => return Enriched::Unresolved("job count not found".into()),
        };
        if total < self.min_jobs || total > self.max_jobs {
            return Enriched::Drop(format!(
                "{} open jobs outside {}..={}",
                total, self.min_jobs, self.max_jobs
            ));
        }
        Enriched::Keep(record.with_field("jobs", total.to_string()))
    }
}

/// Site-wide keyword search for the company name.
fn company_search_url(record: &Record) -> String {
    let company: String =
        url::form_urlencoded::byte_serialize(record.get("company").as_bytes()).collect();
    format!("{}/jobs/in-deutschland?keywords={}", ORIGIN, company)
}

fn parse_card(card: ElementRef<'_>, page_url: &str, query: &Query) -> Option<Record> {
    let text_of = |sel: &Selector| {
        card.select(sel)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty())
    };
    let href_of = |sel: &Selector| {
        card.select(sel)
            .next()
            .and_then(|el| el.value().attr("href"))
            .and_then(|h| absolutize(page_url, h))
    };

    let company = text_of(&COMPANY)?;
    let uid = card
        .select(&COMPANY_LINK)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|h| UID_RE.captures(h))
        .map(|c| c[1].to_string());

    Fields::new()
        .set("keyword", Some(context_value(query, "keyword").to_string()))
        .set("location", Some(context_value(query, "location").to_string()))
        .set("title", text_of(&TITLE))
        .set("company", Some(company))
        .set("jobs", None)
        .set("profile", href_of(&PROFILE_LINK))
        .set("url", href_of(&JOB_LINK).map(|u| canonical_url(&u)))
        .set("company_uid", uid)
        .build(KeyRule::NormalizedText("company"))
}

/// Total open positions shown on a company or search page.
pub fn parse_total(html: &str) -> Option<u32> {
    if let Some(caps) = TOTAL_JSON_RE.captures(html) {
        return caps[1].parse().ok();
    }
    let from_element = {
        let doc = Html::parse_document(html);
        doc.select(&TOTAL_EL)
            .next()
            .map(|el| el.text().collect::<String>())
            .and_then(|t| digits(&t))
    };
    if from_element.is_some() {
        return from_element;
    }
    TOTAL_TEXT_RE
        .captures(html)
        .and_then(|caps| digits(&caps[1]))
}

fn digits(s: &str) -> Option<u32> {
    let d: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    d.parse().ok()
}
