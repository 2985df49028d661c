use url::Url;

/// Path fragment that marks a message as a reel link
pub const REEL_MARKER: &str = "instagram.com/reel/";

/// Whether a chat message should be relayed at all
pub fn is_reel_link(text: &str) -> bool {
    text.contains(REEL_MARKER)
}

/// The whitespace-delimited word of a message that carries the reel link
pub fn find_reel_link(text: &str) -> Option<&str> {
    text.split_whitespace().find(|word| is_reel_link(word))
}

/// Drop query, fragment and the trailing slash from a reel link.
///
/// A link typed without a scheme is taken as `https`. Returns `None` when the
/// text does not parse as a URL.
pub fn normalize_reel_url(text: &str) -> Option<String> {
    let text = text.trim();
    let mut url = Url::parse(text)
        .ok()
        .filter(|url| url.has_host())
        .or_else(|| Url::parse(&format!("https://{text}")).ok())?;

    url.set_query(None);
    url.set_fragment(None);

    let normalized = url.as_str().trim_end_matches('/').to_string();
    Some(normalized)
}
