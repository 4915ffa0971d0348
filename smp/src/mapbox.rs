//! Expansion of `mapbox://` URLs to their HTTPS API endpoints.
//!
//! Mapbox styles reference resources through a private URL scheme that only
//! the Mapbox SDKs resolve. The downloader normalizes those to
//! `api.mapbox.com` endpoints before fetching. All expanded URLs require a
//! public (`pk.*`) access token; secret tokens are rejected outright so
//! they never end up in request logs.

use url::Url;

use crate::errors::{SmpError, SmpResult};

const API_BASE: &str = "https://api.mapbox.com";

/// Expand a `mapbox://` URL to its HTTPS endpoint, appending the access
/// token. Non-mapbox URLs pass through unchanged and need no token.
pub fn normalize_url(url: &str, access_token: Option<&str>) -> SmpResult<String> {
    let Some(rest) = url.strip_prefix("mapbox://") else {
        return Ok(url.to_string());
    };

    let expanded = match rest.split_once('/') {
        Some(("styles", path)) => format!("{API_BASE}/styles/v1/{path}"),
        Some(("fonts", path)) => format!("{API_BASE}/fonts/v1/{path}"),
        Some(("sprites", path)) => format!("{API_BASE}/styles/v1/{path}/sprite"),
        // A bare tileset id ("mapbox.satellite") resolves to its TileJSON.
        _ => format!("{API_BASE}/v4/{rest}.json?secure"),
    };

    with_token(&expanded, access_token)
}

/// Build the fetch URL for one sprite variant (`pixel_ratio` ≥ 1, `ext` is
/// `.json` or `.png`). `mapbox://sprites/…` URLs expand to the styles API;
/// anything else gets the suffix appended verbatim.
pub fn sprite_url(
    base: &str,
    pixel_ratio: u8,
    ext: &str,
    access_token: Option<&str>,
) -> SmpResult<String> {
    let ratio_suffix = if pixel_ratio > 1 {
        format!("@{pixel_ratio}x")
    } else {
        String::new()
    };

    if let Some(path) = base.strip_prefix("mapbox://sprites/") {
        return with_token(
            &format!("{API_BASE}/styles/v1/{path}/sprite{ratio_suffix}{ext}"),
            access_token,
        );
    }
    Ok(format!("{base}{ratio_suffix}{ext}"))
}

fn with_token(url: &str, access_token: Option<&str>) -> SmpResult<String> {
    let token = access_token.ok_or(SmpError::MissingAccessToken)?;
    if token.starts_with("sk.") {
        return Err(SmpError::SecretToken);
    }
    let mut url =
        Url::parse(url).map_err(|e| SmpError::InvalidStyle(format!("invalid URL {url}: {e}")))?;
    url.query_pairs_mut().append_pair("access_token", token);
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const TOKEN: Option<&str> = Some("pk.abc123");

    #[test]
    fn test_passthrough() {
        let url = "https://demotiles.maplibre.org/style.json";
        assert_eq!(normalize_url(url, None).unwrap(), url);
        assert_eq!(normalize_url(url, TOKEN).unwrap(), url);
    }

    #[test]
    fn test_style_expansion() {
        let url = normalize_url("mapbox://styles/mapbox/streets-v12", TOKEN).unwrap();
        assert!(url.starts_with("https://api.mapbox.com/styles/v1/mapbox/streets-v12"));
        assert!(url.contains("access_token=pk.abc123"));
    }

    #[test]
    fn test_font_expansion() {
        let url = normalize_url(
            "mapbox://fonts/mapbox/DIN Offc Pro Medium/0-255.pbf",
            TOKEN,
        )
        .unwrap();
        assert!(url.contains("/fonts/v1/mapbox/"));
        assert!(url.contains("0-255.pbf"));
        assert!(url.contains("access_token="));
    }

    #[test]
    fn test_tileset_expansion() {
        let url = normalize_url("mapbox://mapbox.satellite", TOKEN).unwrap();
        assert!(url.starts_with("https://api.mapbox.com/v4/mapbox.satellite.json?secure"));
        assert!(url.contains("access_token="));
    }

    #[rstest]
    #[case(1, ".json", "https://api.mapbox.com/styles/v1/mapbox/bright/sprite.json")]
    #[case(2, ".png", "https://api.mapbox.com/styles/v1/mapbox/bright/sprite@2x.png")]
    fn test_sprite_expansion(#[case] ratio: u8, #[case] ext: &str, #[case] expected_prefix: &str) {
        let url = sprite_url("mapbox://sprites/mapbox/bright", ratio, ext, TOKEN).unwrap();
        assert!(url.starts_with(expected_prefix), "{url}");
        assert!(url.contains("access_token="));
    }

    #[rstest]
    #[case(1, ".json", "https://example.com/sprites/base.json")]
    #[case(3, ".png", "https://example.com/sprites/base@3x.png")]
    fn test_sprite_plain(#[case] ratio: u8, #[case] ext: &str, #[case] expected: &str) {
        let url = sprite_url("https://example.com/sprites/base", ratio, ext, None).unwrap();
        assert_eq!(url, expected);
    }

    #[test]
    fn test_missing_token() {
        let err = normalize_url("mapbox://styles/mapbox/streets-v12", None).unwrap_err();
        assert!(matches!(err, SmpError::MissingAccessToken));
    }

    #[test]
    fn test_secret_token_rejected() {
        let err = normalize_url("mapbox://mapbox.satellite", Some("sk.secret")).unwrap_err();
        assert!(matches!(err, SmpError::SecretToken));
    }
}
