use async_trait::async_trait;
use rust_decimal::Decimal;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{checksum, ChangeProcessor, ProcessContext, ProcessorOutcome};
use crate::models::{InStockProcessing, ProcessorKind, Restock, RestockSettings, Tag, Watch, WatchUpdate};
use crate::utils::error::CheckError;

/// Sentinel the in-stock scanner script returns when no out-of-stock text
/// was visible.
pub const POSSIBLY_IN_STOCK: &str = "Possibly in stock";

const IN_STOCK_TOKENS: [&str; 5] = [
    "instock",
    "instoreonly",
    "limitedavailability",
    "onlineonly",
    "presale",
];

/// Pure `html -> {price, currency, availability}` scan.
pub type Extractor = fn(&str) -> Result<Restock, CheckError>;

#[derive(Debug, Default)]
struct Candidates {
    prices: Vec<String>,
    currencies: Vec<String>,
    availability: Vec<String>,
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl Candidates {
    fn walk_json(&mut self, value: &Value) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    match key.as_str() {
                        "price" | "Price" => self.prices.extend(scalar_text(child)),
                        "pricecurrency" | "currency" | "priceCurrency" => {
                            self.currencies.extend(scalar_text(child))
                        }
                        "availability" | "Availability" => self.availability.extend(scalar_text(child)),
                        _ => {}
                    }
                    self.walk_json(child);
                }
            }
            Value::Array(items) => items.iter().for_each(|item| self.walk_json(item)),
            _ => {}
        }
    }

    fn scan_json_ld(&mut self, document: &Html) {
        let Ok(selector) = Selector::parse(r#"script[type="application/ld+json"]"#) else {
            return;
        };
        for script in document.select(&selector) {
            let raw: String = script.text().collect();
            match serde_json::from_str::<Value>(raw.trim()) {
                Ok(value) => self.walk_json(&value),
                Err(e) => debug!("Skipping malformed JSON-LD block: {}", e),
            }
        }
    }

    fn scan_microdata(&mut self, document: &Html) {
        let Ok(selector) = Selector::parse("[itemprop]") else {
            return;
        };
        for element in document.select(&selector) {
            let attrs = element.value();
            let text = || {
                let t: String = element.text().collect::<String>().trim().to_string();
                (!t.is_empty()).then_some(t)
            };
            for prop in attrs.attr("itemprop").unwrap_or_default().split_whitespace() {
                match prop {
                    "price" => self
                        .prices
                        .extend(attrs.attr("content").map(str::to_string).or_else(text)),
                    "priceCurrency" => self
                        .currencies
                        .extend(attrs.attr("content").map(str::to_string).or_else(text)),
                    "availability" => self.availability.extend(
                        attrs
                            .attr("content")
                            .or_else(|| attrs.attr("href"))
                            .map(str::to_string)
                            .or_else(text),
                    ),
                    _ => {}
                }
            }
        }
    }

    fn scan_opengraph(&mut self, document: &Html) {
        let Ok(selector) = Selector::parse("meta[property]") else {
            return;
        };
        for meta in document.select(&selector) {
            let property = meta.value().attr("property").unwrap_or_default().to_lowercase();
            let Some(content) = meta.value().attr("content").map(str::trim).filter(|c| !c.is_empty()) else {
                continue;
            };
            if property.ends_with("price:amount") {
                self.prices.push(content.to_string());
            } else if property.ends_with("price:currency") {
                self.currencies.push(content.to_string());
            } else if property == "product:availability" || property == "og:availability" {
                self.availability.push(content.to_string());
            }
        }
    }
}

/// Parse a price string, tolerating currency symbols and thousand
/// separators.
pub fn parse_price(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (None, Some(comma)) => {
            if cleaned.len() - comma - 1 == 3 {
                cleaned.replace(',', "")
            } else {
                cleaned.replace(',', ".")
            }
        }
        _ => cleaned,
    };
    Decimal::from_str(&normalized).ok().map(|d| d.normalize())
}

/// Lower-case, unquote and drop any schema.org prefix.
pub fn normalize_availability(raw: &str) -> String {
    let value = raw
        .trim_matches(|c| c == ' ' || c == '"' || c == '\'')
        .to_lowercase();
    value
        .strip_prefix("https://schema.org/")
        .or_else(|| value.strip_prefix("http://schema.org/"))
        .unwrap_or(&value)
        .to_string()
}

pub fn is_in_stock(availability: &str) -> bool {
    let availability = availability.to_lowercase();
    IN_STOCK_TOKENS.iter().any(|token| availability.contains(token))
}

/// Scan JSON-LD, microdata and OpenGraph for a single product's stock data.
pub fn extract_restock_data(html: &str) -> Result<Restock, CheckError> {
    let document = Html::parse_document(html);
    let mut candidates = Candidates::default();
    candidates.scan_json_ld(&document);
    candidates.scan_microdata(&document);
    candidates.scan_opengraph(&document);

    let distinct: BTreeSet<String> = candidates
        .prices
        .iter()
        .map(|raw| {
            parse_price(raw)
                .map(|p| p.to_string())
                .unwrap_or_else(|| raw.replace('$', "").trim().to_string())
        })
        .collect();
    if distinct.len() > 1 {
        warn!("More than one price found {:?}", distinct);
        return Err(CheckError::MoreThanOnePriceFound);
    }

    Ok(Restock {
        price: candidates.prices.iter().find_map(|raw| parse_price(raw)),
        currency: candidates.currencies.into_iter().next(),
        availability: candidates
            .availability
            .first()
            .map(|raw| normalize_availability(raw))
            .filter(|a| !a.is_empty()),
        in_stock: None,
        original_price: None,
    })
}

/// The first tag that overrides its watches wins; otherwise the watch's own.
pub fn active_restock_settings<'a>(watch: &'a Watch, tags: &'a [Tag]) -> &'a RestockSettings {
    match tags.iter().find(|tag| tag.overrides_watch) {
        Some(tag) => {
            info!(
                "Watch {} - Tag '{}' selected for restock settings override",
                watch.uuid, tag.title
            );
            &tag.restock_settings
        }
        None => &watch.restock_settings,
    }
}

/// Inclusive on both ends; a missing bound is open.
pub fn is_between(number: Decimal, lower: Option<Decimal>, upper: Option<Decimal>) -> bool {
    lower.is_none_or(|l| l <= number) && upper.is_none_or(|u| number <= u)
}

/// Decide whether the new stock/price state is a reportable change.
///
/// Evaluation order is fixed: stock transition, raw price difference,
/// band suppression, then percent suppression (only while still flagged).
pub fn detect_change(previous: Option<&Restock>, current: &Restock, settings: &RestockSettings) -> bool {
    let Some(previous) = previous else {
        return false;
    };
    let mut changed = false;

    if previous.in_stock != current.in_stock {
        match settings.in_stock_processing {
            InStockProcessing::InStockOnly if current.in_stock == Some(true) => changed = true,
            InStockProcessing::AllChanges => changed = true,
            _ => {}
        }
    }

    let price = current.price.filter(|p| !p.is_zero());
    if let (true, Some(price)) = (settings.follow_price_changes, price) {
        let baseline = previous.original_price.filter(|p| !p.is_zero());
        if baseline.is_some_and(|b| b != price) {
            changed = true;
        }

        let (min, max) = (settings.min_limit(), settings.max_limit());
        if (min.is_some() || max.is_some()) && is_between(price, min, max) {
            debug!("{} is between {:?} and {:?}, forcing no change", price, min, max);
            changed = false;
        }

        if let (true, Some(baseline), Some(threshold)) = (changed, baseline, settings.threshold_percent()) {
            let change = (price - baseline)
                .checked_div(baseline)
                .map(|ratio| (ratio * Decimal::ONE_HUNDRED).abs())
                .unwrap_or_default();
            if !change.is_zero() && change <= threshold {
                debug!("Price change {}% within threshold {}%, forcing no change", change, threshold);
                changed = false;
            }
        }
    }

    changed
}

/// Restock and price detection for single-product pages.
pub struct RestockProcessor {
    timeout: Duration,
    extractor: Extractor,
}

impl RestockProcessor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            extractor: extract_restock_data,
        }
    }

    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Run the extractor on the blocking pool so a panic or a runaway parse
    /// cannot take the worker with it.
    async fn extract_isolated(&self, html: String) -> Result<Restock, CheckError> {
        let extractor = self.extractor;
        let task = tokio::task::spawn_blocking(move || extractor(&html));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(CheckError::Unexpected(format!(
                "Structured data extraction failed: {}",
                join_error
            ))),
            Err(_) => Err(CheckError::Unexpected(format!(
                "Structured data extraction timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl ChangeProcessor for RestockProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::RestockDiff
    }

    async fn run(&self, ctx: &ProcessContext<'_>) -> Result<ProcessorOutcome, CheckError> {
        let watch = ctx.watch;
        let fetched = ctx.fetched;
        let settings = active_restock_settings(watch, ctx.tags);

        let extracted = self.extract_isolated(fetched.content.as_text().into_owned()).await?;

        let mut restock = if extracted.price.is_some() || extracted.availability.is_some() {
            extracted
        } else {
            Restock::default()
        };

        match (&restock.availability, &fetched.instock_data) {
            (Some(availability), _) => restock.in_stock = Some(is_in_stock(availability)),
            (None, Some(signal)) => {
                debug!("Watch {} restock check returned '{}' from page scan", watch.uuid, signal);
                restock.in_stock = Some(signal == POSSIBLY_IN_STOCK);
            }
            (None, None) => {
                return Err(CheckError::RestockDataUnavailable {
                    status_code: fetched.status_code,
                    url: watch.url.clone(),
                });
            }
        }

        // The next check compares against this run's price
        restock.original_price = restock.price;

        let snapshot = format!(
            "In Stock: {} - Price: {}",
            restock.in_stock.unwrap_or(false),
            restock.price.map(|p| p.to_string()).unwrap_or_default()
        )
        .trim()
        .to_string();
        let fetched_checksum = checksum(snapshot.as_bytes());
        debug!(
            "Watch {} restock check - previous checksum {:?}, fetched {}",
            watch.uuid, watch.previous_checksum, fetched_checksum
        );

        let changed = detect_change(watch.restock.as_ref(), &restock, settings);

        let update = WatchUpdate {
            last_error: Some(None),
            last_check_status: Some(fetched.status_code),
            content_type: Some(fetched.content_type()),
            previous_checksum: Some(fetched_checksum),
            restock: Some(restock),
            ..Default::default()
        };

        Ok(ProcessorOutcome {
            changed,
            update,
            snapshot: snapshot.into_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetchers::{FetchResult, FetchedContent};
    use rstest::rstest;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn product_page(price: &str, availability: &str) -> String {
        format!(
            r#"<html><head><script type="application/ld+json">
            {{"@context": "https://schema.org", "@type": "Product", "name": "Widget",
              "offers": {{"@type": "Offer", "price": "{}", "priceCurrency": "USD",
                          "availability": "{}"}}}}
            </script></head><body><h1>Widget</h1></body></html>"#,
            price, availability
        )
    }

    fn stocked(in_stock: bool, price: &str, original: &str) -> Restock {
        Restock {
            in_stock: Some(in_stock),
            price: Some(dec(price)),
            original_price: Some(dec(original)),
            ..Default::default()
        }
    }

    fn price_settings(threshold: Option<&str>, min: Option<&str>, max: Option<&str>) -> RestockSettings {
        RestockSettings {
            follow_price_changes: true,
            in_stock_processing: InStockProcessing::InStockOnly,
            price_change_threshold_percent: threshold.map(dec),
            price_change_min: min.map(dec),
            price_change_max: max.map(dec),
        }
    }

    #[test]
    fn test_extract_json_ld() {
        let restock = extract_restock_data(&product_page("121.95", "https://schema.org/InStock")).unwrap();
        assert_eq!(restock.price, Some(dec("121.95")));
        assert_eq!(restock.currency.as_deref(), Some("USD"));
        assert_eq!(restock.availability.as_deref(), Some("instock"));
    }

    #[test]
    fn test_extract_microdata_and_opengraph() {
        let html = r#"<html><head>
            <meta property="product:price:amount" content="19.99">
            <meta property="product:price:currency" content="EUR">
            </head><body><div itemscope itemtype="https://schema.org/Product">
            <span itemprop="price" content="19.99">19,99 €</span>
            <link itemprop="availability" href="http://schema.org/OutOfStock">
            </div></body></html>"#;
        let restock = extract_restock_data(html).unwrap();
        assert_eq!(restock.price, Some(dec("19.99")));
        assert_eq!(restock.currency.as_deref(), Some("EUR"));
        assert_eq!(restock.availability.as_deref(), Some("outofstock"));
    }

    #[test]
    fn test_duplicate_prices_are_fine_distinct_prices_are_not() {
        let html = r#"<html><head>
            <script type="application/ld+json">{"offers": {"price": "$121.95"}}</script>
            <meta property="og:price:amount" content="121.950">
            </head><body><span itemprop="price">121.95</span></body></html>"#;
        assert_eq!(extract_restock_data(html).unwrap().price, Some(dec("121.95")));

        let html = r#"<html><head>
            <script type="application/ld+json">[{"price": 10}, {"price": 12}]</script>
            </head><body></body></html>"#;
        assert!(matches!(extract_restock_data(html), Err(CheckError::MoreThanOnePriceFound)));
    }

    #[test]
    fn test_malformed_json_ld_is_skipped() {
        let html = r#"<script type="application/ld+json">{not json</script>
            <span itemprop="availability" content="InStock"></span>"#;
        let restock = extract_restock_data(html).unwrap();
        assert_eq!(restock.availability.as_deref(), Some("instock"));
    }

    #[rstest]
    #[case("$1,234.50", Some("1234.5"))]
    #[case("1.234,50 €", Some("1234.5"))]
    #[case("12,99", Some("12.99"))]
    #[case("100.00", Some("100"))]
    #[case("free", None)]
    fn test_parse_price(#[case] raw: &str, #[case] expected: Option<&str>) {
        assert_eq!(parse_price(raw), expected.map(dec));
    }

    #[rstest]
    #[case("InStock", true)]
    #[case("https://schema.org/InStock", true)]
    #[case("\"http://schema.org/LimitedAvailability\"", true)]
    #[case("PreSale", true)]
    #[case("OnlineOnly", true)]
    #[case("OutOfStock", false)]
    #[case("https://schema.org/SoldOut", false)]
    #[case("Discontinued", false)]
    fn test_availability_classification(#[case] raw: &str, #[case] expected: bool) {
        assert_eq!(is_in_stock(&normalize_availability(raw)), expected);
    }

    #[test]
    fn test_is_between_inclusive() {
        assert!(is_between(dec("10"), Some(dec("10")), Some(dec("20"))));
        assert!(is_between(dec("20"), Some(dec("10")), Some(dec("20"))));
        assert!(!is_between(dec("20.01"), Some(dec("10")), Some(dec("20"))));
        assert!(is_between(dec("5"), None, Some(dec("20"))));
        assert!(is_between(dec("500"), Some(dec("10")), None));
    }

    #[test]
    fn test_in_stock_only_policy() {
        let settings = RestockSettings::default();
        let previous = Restock {
            in_stock: Some(false),
            ..Default::default()
        };
        let back = Restock {
            in_stock: Some(true),
            ..Default::default()
        };
        assert!(detect_change(Some(&previous), &back, &settings));

        let previous_in = Restock {
            in_stock: Some(true),
            ..Default::default()
        };
        let gone = Restock {
            in_stock: Some(false),
            ..Default::default()
        };
        assert!(!detect_change(Some(&previous_in), &gone, &settings));
        assert!(!detect_change(Some(&previous), &previous.clone(), &settings));
    }

    #[test]
    fn test_all_changes_and_off_policies() {
        let previous = Restock {
            in_stock: Some(true),
            ..Default::default()
        };
        let gone = Restock {
            in_stock: Some(false),
            ..Default::default()
        };
        let mut settings = RestockSettings {
            in_stock_processing: InStockProcessing::AllChanges,
            ..Default::default()
        };
        assert!(detect_change(Some(&previous), &gone, &settings));

        settings.in_stock_processing = InStockProcessing::Off;
        assert!(!detect_change(Some(&previous), &gone, &settings));
    }

    #[test]
    fn test_no_previous_restock_is_never_a_change() {
        let settings = price_settings(None, None, None);
        assert!(!detect_change(None, &stocked(true, "10", "10"), &settings));
    }

    #[rstest]
    #[case("103.00", false)]
    #[case("106.00", true)]
    #[case("95.00", false)]
    #[case("90.00", true)]
    #[case("100.00", false)]
    fn test_percent_threshold(#[case] new_price: &str, #[case] expected: bool) {
        let previous = stocked(true, "100.00", "100.00");
        let current = stocked(true, new_price, "100.00");
        let settings = price_settings(Some("5"), None, None);
        assert_eq!(detect_change(Some(&previous), &current, &settings), expected);
    }

    #[rstest]
    #[case("150", false)]
    #[case("200", false)]
    #[case("250", true)]
    #[case("120", true)]
    fn test_price_band(#[case] new_price: &str, #[case] expected: bool) {
        let previous = stocked(true, "130", "130");
        let current = stocked(true, new_price, "130");
        let settings = price_settings(None, Some("150"), Some("200"));
        assert_eq!(detect_change(Some(&previous), &current, &settings), expected);
    }

    #[test]
    fn test_zero_band_limits_are_ignored() {
        let previous = stocked(true, "100", "100");
        let current = stocked(true, "150", "100");
        let settings = price_settings(None, Some("0"), Some("0"));
        assert!(detect_change(Some(&previous), &current, &settings));
    }

    #[test]
    fn test_band_wins_over_stock_transition() {
        // A stock transition inside the band is still suppressed: the band
        // check writes the same flag after the stock rule.
        let previous = stocked(false, "100", "100");
        let current = stocked(true, "110", "100");
        let settings = price_settings(Some("50"), Some("50"), Some("200"));
        assert!(!detect_change(Some(&previous), &current, &settings));
    }

    #[test]
    fn test_percent_rule_can_suppress_stock_transition() {
        let previous = stocked(false, "100", "100");
        let current = stocked(true, "102", "100");
        let settings = price_settings(Some("5"), None, None);
        assert!(!detect_change(Some(&previous), &current, &settings));
    }

    #[test]
    fn test_price_rules_need_follow_price_changes() {
        let previous = stocked(true, "100", "100");
        let current = stocked(true, "300", "100");
        let settings = RestockSettings::default();
        assert!(!detect_change(Some(&previous), &current, &settings));
    }

    #[test]
    fn test_tag_override_first_wins() {
        let mut watch = Watch::new("https://shop.example");
        watch.restock_settings.in_stock_processing = InStockProcessing::Off;
        let tags = vec![
            Tag {
                uuid: "a".to_string(),
                title: "plain".to_string(),
                overrides_watch: false,
                restock_settings: RestockSettings {
                    in_stock_processing: InStockProcessing::InStockOnly,
                    ..Default::default()
                },
            },
            Tag {
                uuid: "b".to_string(),
                title: "override".to_string(),
                overrides_watch: true,
                restock_settings: RestockSettings {
                    in_stock_processing: InStockProcessing::AllChanges,
                    ..Default::default()
                },
            },
            Tag {
                uuid: "c".to_string(),
                title: "later".to_string(),
                overrides_watch: true,
                restock_settings: RestockSettings::default(),
            },
        ];

        assert_eq!(
            active_restock_settings(&watch, &tags).in_stock_processing,
            InStockProcessing::AllChanges
        );
        assert_eq!(
            active_restock_settings(&watch, &tags[..1]).in_stock_processing,
            InStockProcessing::Off
        );
    }

    fn fetched(html: &str, instock: Option<&str>) -> FetchResult {
        let mut result = FetchResult::new(200, FetchedContent::Text(html.to_string()));
        result.instock_data = instock.map(str::to_string);
        result
    }

    #[tokio::test]
    async fn test_processor_builds_snapshot_and_baseline() {
        let watch = Watch::new("https://shop.example/widget");
        let page = fetched(&product_page("49.99", "InStock"), None);
        let ctx = ProcessContext {
            watch: &watch,
            fetched: &page,
            tags: &[],
        };

        let outcome = RestockProcessor::new(Duration::from_secs(5)).run(&ctx).await.unwrap();
        assert_eq!(outcome.snapshot, b"In Stock: true - Price: 49.99");
        assert!(!outcome.changed);
        let restock = outcome.update.restock.unwrap();
        assert_eq!(restock.original_price, Some(dec("49.99")));
        assert_eq!(
            outcome.update.previous_checksum,
            Some(checksum(b"In Stock: true - Price: 49.99"))
        );
    }

    #[tokio::test]
    async fn test_processor_moves_baseline_to_current_price() {
        let mut watch = Watch::new("https://shop.example/widget");
        watch.restock = Some(stocked(true, "55", "40"));
        let page = fetched(&product_page("60", "InStock"), None);
        let ctx = ProcessContext {
            watch: &watch,
            fetched: &page,
            tags: &[],
        };

        let outcome = RestockProcessor::new(Duration::from_secs(5)).run(&ctx).await.unwrap();
        assert_eq!(outcome.update.restock.unwrap().original_price, Some(dec("60")));
    }

    #[tokio::test]
    async fn test_steady_price_after_a_move_is_unchanged() {
        let mut watch = Watch::new("https://shop.example/widget");
        watch.restock_settings = price_settings(None, None, None);
        let processor = RestockProcessor::new(Duration::from_secs(5));

        let mut results = Vec::new();
        for price in ["100", "110", "110", "110"] {
            let page = fetched(&product_page(price, "InStock"), None);
            let ctx = ProcessContext {
                watch: &watch,
                fetched: &page,
                tags: &[],
            };
            let outcome = processor.run(&ctx).await.unwrap();
            results.push(outcome.changed);
            watch.restock = outcome.update.restock;
        }

        assert_eq!(results, vec![false, true, false, false]);
    }

    #[tokio::test]
    async fn test_processor_falls_back_to_page_scan() {
        let watch = Watch::new("https://shop.example/widget");
        let page = fetched("<html><body>Nothing structured</body></html>", Some("sold out"));
        let ctx = ProcessContext {
            watch: &watch,
            fetched: &page,
            tags: &[],
        };

        let outcome = RestockProcessor::new(Duration::from_secs(5)).run(&ctx).await.unwrap();
        assert_eq!(outcome.snapshot, b"In Stock: false - Price:");

        let page = fetched("<html><body>Nothing</body></html>", Some(POSSIBLY_IN_STOCK));
        let ctx = ProcessContext {
            watch: &watch,
            fetched: &page,
            tags: &[],
        };
        let outcome = RestockProcessor::new(Duration::from_secs(5)).run(&ctx).await.unwrap();
        assert_eq!(outcome.update.restock.unwrap().in_stock, Some(true));
    }

    #[tokio::test]
    async fn test_processor_without_any_signal() {
        let watch = Watch::new("https://shop.example/widget");
        let page = fetched("<html><body>Nothing</body></html>", None);
        let ctx = ProcessContext {
            watch: &watch,
            fetched: &page,
            tags: &[],
        };

        let err = RestockProcessor::new(Duration::from_secs(5)).run(&ctx).await.unwrap_err();
        match err {
            CheckError::RestockDataUnavailable { status_code, url } => {
                assert_eq!(status_code, 200);
                assert_eq!(url, "https://shop.example/widget");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    fn panicking_extractor(_: &str) -> Result<Restock, CheckError> {
        panic!("parser blew up");
    }

    #[tokio::test]
    async fn test_extractor_panic_is_contained() {
        let watch = Watch::new("https://shop.example/widget");
        let page = fetched(&product_page("1", "InStock"), None);
        let ctx = ProcessContext {
            watch: &watch,
            fetched: &page,
            tags: &[],
        };

        let processor = RestockProcessor::new(Duration::from_secs(5)).with_extractor(panicking_extractor);
        let err = processor.run(&ctx).await.unwrap_err();
        assert!(matches!(err, CheckError::Unexpected(_)));
    }
}
