use url::Url;

const VIRTUAL_HOSTS: &[&str] = &[
    "zoom.us",
    "teams.microsoft",
    "youtube.com",
    "youtu.be",
    "facebook.com/live",
    "livestream",
    "webex",
];

/// Resolves `href` against `base`. Only http(s) results are kept.
pub fn absolutize(href: &str, base: Option<&Url>) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    let resolved = match Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(href).ok()?,
        Err(_) => return None,
    };
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// Absolute http(s) URL or empty; relative fragments never survive.
pub fn sanitize(link: Option<&str>) -> String {
    link.and_then(|value| absolutize(value, None))
        .unwrap_or_default()
}

pub fn parse_base(base: &str) -> Option<Url> {
    let trimmed = base.trim();
    if trimmed.is_empty() {
        return None;
    }
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash).ok()
}

/// Portal meeting id from the `Id`/`id` query parameter.
pub fn meeting_id_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, value)| key.eq_ignore_ascii_case("id") && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

pub fn is_virtual_meeting_link(href: &str) -> bool {
    let lowered = href.to_lowercase();
    VIRTUAL_HOSTS.iter().any(|host| lowered.contains(host))
}
