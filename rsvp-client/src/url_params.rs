use url::Url;
use url::form_urlencoded;

/// Guest identity carried in an invitation link (`/?name=...&id=...`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UrlParams {
    pub name: Option<String>,
    pub id: Option<String>,
}

impl UrlParams {
    /// Extracts the parameters from the page location. `None`, or a location
    /// that cannot be parsed, yields empty parameters rather than an error so
    /// this is safe to call outside a browser-like context.
    pub fn from_location(location: Option<&str>) -> Self {
        let Some(location) = location else {
            return UrlParams::default();
        };

        match Url::parse(location) {
            Ok(url) => Self::from_query(url.query().unwrap_or("")),
            // Relative locations such as "/?name=..." or a bare "?name=..."
            Err(_) => match location.split_once('?') {
                Some((_, query)) => Self::from_query(query.split('#').next().unwrap_or("")),
                None => UrlParams::default(),
            },
        }
    }

    pub fn from_query(query: &str) -> Self {
        let mut name = None;
        let mut id = None;

        // Like URLSearchParams.get, the first occurrence of a key wins.
        for (key, value) in form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            match &*key {
                "name" if name.is_none() => name = Some(collapse_whitespace(&value)),
                "id" if id.is_none() => id = Some(value.trim().to_string()),
                _ => {}
            }
        }

        UrlParams {
            name: name.filter(|n| !n.is_empty()),
            id: id.filter(|i| !i.is_empty()),
        }
    }
}

/// Trims and folds runs of whitespace (including the non-breaking spaces
/// messaging apps like to insert) into single spaces.
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
