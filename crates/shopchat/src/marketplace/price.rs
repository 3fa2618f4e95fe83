use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NUMBER: Regex = Regex::new(r"[\d,]+\.?\d*").unwrap();
    static ref YEN_NOISE: Regex = Regex::new(r"[¥￥,\s円]").unwrap();
}

/// Parse a displayed price into whole yen, converting dollar prices with `usd_to_jpy`.
/// Anything unparseable is 0.
pub fn parse_price(text: &str, usd_to_jpy: f64) -> i64 {
    if is_usd(text) {
        return NUMBER
            .find(text)
            .and_then(|m| m.as_str().replace(',', "").parse::<f64>().ok())
            .map(|usd| (usd * usd_to_jpy) as i64)
            .unwrap_or(0);
    }

    YEN_NOISE.replace_all(text, "").parse().unwrap_or(0)
}

pub fn is_usd(text: &str) -> bool {
    text.contains("US$") || text.contains("USD")
}
