// Token-guarded redirect pages
//
// The player page builds its download link in script: a `norobotlink`
// assignment carries the token and a hidden `#ideoooolink` element carries
// the host-relative path. Both halves are needed to form the final URL.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::courier::errors::ResolutionFailure;

lazy_static! {
    static ref NOROBOT_SCRIPT: Regex =
        Regex::new(r"document\.getElementById\('norobotlink'\)\.innerHTML\s*=\s*(.+?);").unwrap();
    static ref TOKEN: Regex = Regex::new(r"token=([^&']+)").unwrap();
    static ref LINK_ELEMENT: Selector = Selector::parse("#ideoooolink").unwrap();
}

/// Whether the page carries the token-building script at all
pub fn has_token_script(html: &str) -> bool {
    NOROBOT_SCRIPT.is_match(html)
}

/// Watch-page form of an embed URL (`/e/` -> `/v/`)
pub fn watch_url(url: &Url) -> Url {
    if !url.path().contains("/e/") {
        return url.clone();
    }
    let mut out = url.clone();
    out.set_path(&url.path().replacen("/e/", "/v/", 1));
    out
}

/// Build the final download URL from the page's script and hidden link
pub fn decode_token_redirect(html: &str) -> Result<Url, ResolutionFailure> {
    let script = NOROBOT_SCRIPT
        .captures(html)
        .and_then(|c| c.get(1))
        .ok_or_else(|| ResolutionFailure::TokenDecodeFailed("no norobotlink script".to_string()))?;

    let token = TOKEN
        .captures(script.as_str())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ResolutionFailure::TokenDecodeFailed("script carries no token".to_string()))?;

    let path = {
        let doc = Html::parse_document(html);
        doc.select(&LINK_ELEMENT)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    }
    .ok_or_else(|| ResolutionFailure::TokenDecodeFailed("hidden link element missing".to_string()))?;

    let raw = format!("https://{}&token={}&dl=1", path.trim_start_matches('/'), token);
    Url::parse(&raw).map_err(|e| ResolutionFailure::TokenDecodeFailed(format!("{}: {}", raw, e)))
}
