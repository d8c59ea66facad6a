//! Document names, hrefs and virtual preview URLs

use url::Url;

/// Private scheme the renderer uses for authored content.
pub const PREVIEW_SCHEME: &str = "folio";

/// Private host the renderer uses for authored content.
pub const PREVIEW_HOST: &str = "preview";

/// Build the virtual URL for a document name.
///
/// ```
/// let url = folio_core::name_to_url("text/chapter 1.xhtml");
/// assert_eq!(url.as_str(), "folio://preview/text/chapter%201.xhtml");
/// ```
pub fn name_to_url(name: &str) -> Url {
    let mut url = Url::parse(&format!("{PREVIEW_SCHEME}://{PREVIEW_HOST}/"))
        .expect("static preview base URL is valid");
    url.set_path(&format!("/{name}"));
    url
}

/// Extract the document name from a URL path (`/text/ch1.xhtml`).
///
/// Returns `None` when the path is empty or not valid percent-encoded UTF-8.
pub fn path_to_name(path: &str) -> Option<String> {
    let path = path.strip_prefix('/').unwrap_or(path);
    if path.is_empty() {
        return None;
    }
    urlencoding::decode(path).ok().map(|name| name.into_owned())
}

/// Whether a URL belongs to the private preview scheme/host pair.
pub fn is_preview_url(url: &Url) -> bool {
    url.scheme() == PREVIEW_SCHEME && url.host_str() == Some(PREVIEW_HOST)
}

/// Resolve an href found inside `base_name` to a document name.
///
/// The fragment and query are dropped. Absolute URLs (with a scheme) do not
/// point into the container and resolve to `None`, as do hrefs that climb
/// above the container root.
pub fn href_to_name(href: &str, base_name: &str) -> Option<String> {
    let href = href.split(['#', '?']).next().unwrap_or("");
    if href.is_empty() {
        return Some(base_name.to_string());
    }
    if href.contains("://") || href.starts_with("data:") || href.starts_with("mailto:") {
        return None;
    }
    let href = urlencoding::decode(href).ok()?;

    let mut parts: Vec<&str> = if href.starts_with('/') {
        Vec::new()
    } else {
        let mut base: Vec<&str> = base_name.split('/').collect();
        base.pop();
        base
    };

    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Fragment part of an href, if any.
pub fn href_fragment(href: &str) -> Option<&str> {
    href.split_once('#')
        .map(|(_, frag)| frag)
        .filter(|frag| !frag.is_empty())
}
