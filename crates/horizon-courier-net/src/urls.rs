//! URL clean-up helpers.
//!
//! Callers frequently build URLs by string concatenation, which produces
//! stray spaces and doubled slashes (`https://host//api/items`). The client
//! runs [`sanitize_url`] on every URL it enqueues, except the size probes,
//! unless [`ClientConfig::sanitize_urls`](crate::ClientConfig::sanitize_urls)
//! is off.

/// Remove spaces and collapse repeated `/`, leaving every `://` intact.
///
/// A `/` that directly follows `:/` is kept, so both the scheme separator
/// and URLs embedded in the query survive.
///
/// ```
/// use horizon_courier_net::urls::sanitize_url;
///
/// assert_eq!(
///     sanitize_url(" https://example.com//api ///items "),
///     "https://example.com/api/items"
/// );
/// ```
pub fn sanitize_url(url: &str) -> String {
    let mut sanitized = String::with_capacity(url.len());
    for c in url.chars().filter(|&c| c != ' ') {
        if c == '/' && sanitized.ends_with('/') && !sanitized.ends_with(":/") {
            continue;
        }
        sanitized.push(c);
    }
    sanitized
}

/// Percent-encode one URL component, encoding spaces as `%20`.
///
/// ```
/// use horizon_courier_net::urls::encode_component;
///
/// assert_eq!(encode_component("tom & jerry"), "tom%20%26%20jerry");
/// ```
pub fn encode_component(component: &str) -> String {
    url::form_urlencoded::byte_serialize(component.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
