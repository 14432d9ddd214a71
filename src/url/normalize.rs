use crate::UrlError;
use url::Url;

/// Query parameters that only carry campaign tracking
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "dclid", "msclkid", "mc_eid", "mc_cid"];

/// Rewrites a URL into its canonical dedup form
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject anything that is not http(s) with a host
/// 2. Lowercase the host and drop a leading `www.`
/// 3. Remove dot segments, repeated slashes and the trailing slash (root keeps `/`)
/// 4. Remove the fragment
/// 5. Drop tracking parameters (`utm_*`, click IDs), sort the rest by key,
///    and drop the `?` when nothing remains
///
/// The scheme is kept: `http://a/` and `https://a/` stay distinct.
///
/// # Examples
///
/// ```
/// use spindle::url::normalize_url;
///
/// let url = normalize_url("https://WWW.Example.com/a/./b/?utm_source=x#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/a/b");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    let host = url.host_str().ok_or(UrlError::MissingDomain)?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let path = normalize_path(url.path());
    url.set_path(&path);
    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Collapses dot segments and empty segments; no trailing slash except at root
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    format!("/{}", segments.join("/"))
}

/// Keeps non-tracking parameters, sorted by key (stable for repeated keys)
fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    params.sort_by(|a, b| a.0.cmp(&b.0));
    params
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
