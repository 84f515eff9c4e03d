//! Symbol normalization shared by every `OracleClient`.

/// Normalize a symbol to `UPPER` with `/` as the base/quote separator
/// (e.g. `btc-usd` -> `BTC/USD`). Idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(symbol: &str) -> String {
    symbol.trim().to_uppercase().replace('-', "/")
}

/// Split a normalized symbol into `(base, quote)`. Symbols without a
/// separator return the whole string as the base with an empty quote.
pub fn split_base_quote(symbol: &str) -> (String, String) {
    match symbol.split_once('/') {
        Some((base, quote)) => (base.to_string(), quote.to_string()),
        None => (symbol.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_separator() {
        assert_eq!(normalize("btc-usd"), "BTC/USD");
        assert_eq!(normalize(" eth/usd "), "ETH/USD");
    }

    #[test]
    fn is_idempotent() {
        let once = normalize("btc-usd");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn splits_base_and_quote() {
        assert_eq!(split_base_quote("BTC/USD"), ("BTC".to_string(), "USD".to_string()));
        assert_eq!(split_base_quote("BTC"), ("BTC".to_string(), String::new()));
    }
}
