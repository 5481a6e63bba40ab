use url::form_urlencoded;
use url::Url;

/// Query parameters that never reach a cache key or a log line
const SECRET_PARAMS: &[&str] = &[
    "key",
    "api_key",
    "apikey",
    "access_token",
    "token",
    "password",
    "secret",
    "sessionid",
];

fn is_secret(name: &str) -> bool {
    SECRET_PARAMS
        .iter()
        .any(|secret| name.eq_ignore_ascii_case(secret))
}

/// Deterministic cache key: scheme, authority, path and sorted non-secret query
pub fn cache_key(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !is_secret(name))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    pairs.sort();

    let mut key = authority_and_path(url);
    if !pairs.is_empty() {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        key.push('?');
        key.push_str(&query);
    }
    key
}

/// URL safe to log: secret parameter values are masked, order kept
pub fn redact_url(url: &Url) -> String {
    if url.query().is_none() {
        return authority_and_path(url);
    }

    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(url.query_pairs().map(|(name, value)| {
            let value = if is_secret(&name) {
                "REDACTED".into()
            } else {
                value
            };
            (name, value)
        }))
        .finish();

    format!("{}?{}", authority_and_path(url), query)
}

fn authority_and_path(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    match url.port() {
        // `Url` already drops the scheme's default port
        Some(port) => format!("{}://{}:{}{}", url.scheme(), host, port, url.path()),
        None => format!("{}://{}{}", url.scheme(), host, url.path()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> String {
        cache_key(&Url::parse(raw).unwrap())
    }

    #[test]
    fn test_equivalent_urls_share_a_key() {
        assert_eq!(
            key("https://Market.Example.com:443/listings/730?start=10&count=100#top"),
            key("https://market.example.com/listings/730?count=100&start=10"),
        );
    }

    #[test]
    fn test_secrets_are_dropped_from_keys() {
        let k = key("https://api.example.com/IEconService/GetTradeOffers?key=ABC123&language=en");
        assert_eq!(
            k,
            "https://api.example.com/IEconService/GetTradeOffers?language=en"
        );

        let only_secret = key("https://api.example.com/x?access_token=zzz");
        assert_eq!(only_secret, "https://api.example.com/x");
    }

    #[test]
    fn test_distinct_resources_have_distinct_keys() {
        assert_ne!(key("https://example.com/a"), key("https://example.com/b"));
        assert_ne!(key("https://example.com/a?p=1"), key("https://example.com/a?p=2"));
        assert_ne!(key("http://example.com/a"), key("https://example.com/a"));
        assert_ne!(key("https://example.com:8443/a"), key("https://example.com/a"));
    }

    #[test]
    fn test_redact_url_masks_secret_values() {
        let url = Url::parse("https://api.example.com/x?Key=abc&q=knife").unwrap();
        let redacted = redact_url(&url);
        assert_eq!(redacted, "https://api.example.com/x?Key=REDACTED&q=knife");
        assert!(!redacted.contains("abc"));
    }
}
