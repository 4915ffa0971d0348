//! Tile-URL template expansion.
//!
//! Templates use `{z}`, `{x}`, `{y}` placeholders plus the less common
//! `{quadkey}` and `{prefix}` tokens. Multi-URL template lists are load
//! balanced per tile so neighboring tiles hit different hosts.

use crate::{Scheme, TileCoord};

/// Render a tile URL from a template list.
///
/// The template is picked by `(x + y) % templates.len()`. `{y}` renders
/// flipped (`2^z - y - 1`) for TMS sources; `{prefix}` renders the low
/// hex digit pair of `x + y`, a sharding token some tile CDNs use.
///
/// # Panics
///
/// Panics if `templates` is empty.
#[must_use]
pub fn render_tile_url(templates: &[String], coord: TileCoord, scheme: Scheme) -> String {
    assert!(!templates.is_empty(), "tile source has no URL templates");
    let idx = (coord.x as usize + coord.y as usize) % templates.len();
    let template = &templates[idx];

    let y = match scheme {
        Scheme::Xyz => coord.y,
        Scheme::Tms => (1_u32 << coord.z) - coord.y - 1,
    };

    let mut url = template.replace("{z}", &coord.z.to_string());
    url = url.replace("{x}", &coord.x.to_string());
    url = url.replace("{y}", &y.to_string());
    if url.contains("{quadkey}") {
        url = url.replace("{quadkey}", &coord.quadkey());
    }
    if url.contains("{prefix}") {
        let prefix = format!("{:02x}", (coord.x + coord.y) % 16);
        url = url.replace("{prefix}", &prefix);
    }
    url
}

/// The fixed prefix of a tile-URL template, up to the first `{z}` token.
///
/// This is the "tile folder" of the source: every tile entry rendered from
/// the template starts with it.
#[must_use]
pub fn template_prefix(template: &str) -> Option<&str> {
    template.split_once("{z}").map(|(prefix, _)| prefix)
}
