//! Typed-but-lossless model of a MapLibre style document.
//!
//! The model gives recognized fields (`sources`, `layers`, `glyphs`,
//! `sprite`, `metadata`) real types while every unknown field rides along
//! in flattened maps, so a parse → serialize round trip preserves the
//! document verbatim apart from the rewrites we apply on purpose.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use smp_tile_utils::Scheme;

use crate::errors::{SmpError, SmpResult};

mod rewrite;
pub use rewrite::{
    GeoJsonPolicy, RewriteOptions, RewriteOutput, SpriteFetch, TileSourcePlan, rewrite,
};

/// `style.metadata` key holding the package bounds.
pub const METADATA_BOUNDS: &str = "smp:bounds";
/// `style.metadata` key holding the package maxzoom.
pub const METADATA_MAXZOOM: &str = "smp:maxzoom";
/// `style.metadata` key mapping source ids to archive folder names.
pub const METADATA_SOURCE_FOLDERS: &str = "smp:sourceFolders";

/// Sprite id used when the style declares a single unnamed sprite.
pub const DEFAULT_SPRITE_ID: &str = "default";

/// The style spec version this toolkit understands.
pub const STYLE_VERSION: u64 = 8;

/// A parsed MapLibre style document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleDocument {
    pub version: u64,
    pub sources: BTreeMap<String, Source>,
    pub layers: Vec<Layer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glyphs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sprite: Option<SpriteDef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StyleDocument {
    pub fn parse(bytes: &[u8]) -> SmpResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| SmpError::InvalidStyle(e.to_string()))
    }

    pub fn to_bytes(&self) -> SmpResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// All distinct font stacks referenced by `text-font` layout properties,
    /// in order of first use.
    #[must_use]
    pub fn font_stacks(&self) -> Vec<Vec<String>> {
        let mut stacks = Vec::new();
        for layer in &self.layers {
            if let Some(value) = layer.layout.as_ref().and_then(|l| l.get("text-font")) {
                let mut value = value.clone();
                for_each_font_stack(&mut value, &mut |stack| {
                    if !stacks.contains(stack) {
                        stacks.push(stack.clone());
                    }
                });
            }
        }
        stacks
    }

    /// Replace every `text-font` stack with a single-font stack: the first
    /// member present in `available`, or `available[0]` when none match.
    ///
    /// No-op when `available` is empty.
    pub fn replace_font_stacks(&mut self, available: &[String]) {
        if available.is_empty() {
            return;
        }
        for layer in &mut self.layers {
            if let Some(value) = layer.layout.as_mut().and_then(|l| l.get_mut("text-font")) {
                for_each_font_stack(value, &mut |stack| {
                    let replacement = stack
                        .iter()
                        .find(|font| available.contains(font))
                        .cloned()
                        .unwrap_or_else(|| available[0].clone());
                    *stack = vec![replacement];
                });
            }
        }
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        self.metadata.get_or_insert_with(Map::new)
    }

    /// Set the `smp:*` metadata on this style.
    pub fn set_smp_metadata(
        &mut self,
        bounds: [f64; 4],
        maxzoom: u8,
        source_folders: Option<&BTreeMap<String, String>>,
    ) {
        let metadata = self.metadata_mut();
        metadata.insert(
            METADATA_BOUNDS.to_string(),
            Value::from(bounds.to_vec()),
        );
        metadata.insert(METADATA_MAXZOOM.to_string(), Value::from(maxzoom));
        if let Some(folders) = source_folders {
            let map: Map<String, Value> = folders
                .iter()
                .map(|(id, folder)| (id.clone(), Value::from(folder.as_str())))
                .collect();
            metadata.insert(METADATA_SOURCE_FOLDERS.to_string(), Value::Object(map));
        }
    }
}

/// A style layer. Only `id`, `type` and `layout` are modeled; everything
/// else (paint, filters, zoom ranges) passes through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub id: String,
    #[serde(rename = "type")]
    pub layer_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A style source, tagged by its `type` field.
///
/// Only the source types an SMP can carry get typed variants; everything
/// else is kept verbatim in `Other` so the rewriter can drop it knowingly.
#[derive(Debug, Clone)]
pub enum Source {
    Vector(TileSource),
    Raster(TileSource),
    GeoJson(GeoJsonSource),
    Other(Value),
}

impl Source {
    fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
        Ok(match kind {
            "vector" => Self::Vector(serde_json::from_value(value)?),
            "raster" => Self::Raster(serde_json::from_value(value)?),
            "geojson" => Self::GeoJson(serde_json::from_value(value)?),
            _ => Self::Other(value),
        })
    }

    fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Vector(s) | Self::Raster(s) => serde_json::to_value(s),
            Self::GeoJson(s) => serde_json::to_value(s),
            Self::Other(v) => Ok(v.clone()),
        }
    }

    /// The tile source payload for vector/raster sources.
    #[must_use]
    pub fn as_tile_source(&self) -> Option<&TileSource> {
        match self {
            Self::Vector(s) | Self::Raster(s) => Some(s),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for Source {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(D::Error::custom)
    }
}

impl Serialize for Source {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::Error as _;
        self.to_value()
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

/// A `vector` or `raster` tile source. The `type` field itself lives in
/// `extra`, which keeps serialization lossless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tiles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<[f64; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minzoom: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxzoom: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<Scheme>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TileSource {
    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.scheme.unwrap_or_default()
    }

    /// Merge TileJSON metadata fetched from a `url`-only source into the
    /// inline fields. Inline fields win where both are set, per the
    /// TileJSON embedding rules.
    pub fn inline_tilejson(&mut self, tj: &tilejson::TileJSON) {
        if self.tiles.is_empty() {
            self.tiles = tj.tiles.clone();
        }
        if self.bounds.is_none() {
            self.bounds = tj
                .bounds
                .map(|b| [b.left, b.bottom, b.right, b.top]);
        }
        if self.minzoom.is_none() {
            self.minzoom = tj.minzoom;
        }
        if self.maxzoom.is_none() {
            self.maxzoom = tj.maxzoom;
        }
        if !self.extra.contains_key("format") {
            if let Some(format) = tj.other.get("format") {
                self.extra.insert("format".to_string(), format.clone());
            }
        }
        self.url = None;
    }
}

/// A `geojson` source. `data` is either a URL string or inline GeoJSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoJsonSource {
    pub data: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GeoJsonSource {
    /// The `bbox` member of inline GeoJSON data, if present and well formed.
    #[must_use]
    pub fn data_bbox(&self) -> Option<[f64; 4]> {
        let bbox = self.data.get("bbox")?.as_array()?;
        if bbox.len() < 4 {
            return None;
        }
        let mut out = [0.0; 4];
        for (slot, v) in out.iter_mut().zip(bbox) {
            *slot = v.as_f64()?;
        }
        Some(out)
    }
}

/// The style's `sprite` field: a bare URL or a list of `{id, url}` entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpriteDef {
    Single(String),
    Multi(Vec<SpriteSpec>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpriteSpec {
    pub id: String,
    pub url: String,
}

impl SpriteDef {
    /// `(id, url)` pairs; a single sprite gets the id `default`.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, String)> {
        match self {
            Self::Single(url) => vec![(DEFAULT_SPRITE_ID.to_string(), url.clone())],
            Self::Multi(specs) => specs
                .iter()
                .map(|s| (s.id.clone(), s.url.clone()))
                .collect(),
        }
    }
}

/// Apply `f` to every font stack reachable from a `text-font` value: the
/// value itself when it is a bare array of strings, otherwise every
/// `["literal", [...]]` form nested inside the expression tree. Bare string
/// arrays within an expression are operator calls (`["zoom"]`), never
/// stacks.
fn for_each_font_stack(value: &mut Value, f: &mut impl FnMut(&mut Vec<String>)) {
    let Value::Array(items) = value else {
        return;
    };

    if let Some(mut stack) = as_string_vec(items) {
        f(&mut stack);
        *items = stack.into_iter().map(Value::from).collect();
        return;
    }

    visit_literal_stacks(items, f);
}

fn visit_literal_stacks(items: &mut Vec<Value>, f: &mut impl FnMut(&mut Vec<String>)) {
    if items.first().and_then(Value::as_str) == Some("literal") {
        if let Some(Value::Array(inner)) = items.get_mut(1) {
            if let Some(mut stack) = as_string_vec(inner) {
                f(&mut stack);
                *inner = stack.into_iter().map(Value::from).collect();
                return;
            }
        }
    }

    for item in items {
        if let Value::Array(inner) = item {
            visit_literal_stacks(inner, f);
        }
    }
}

fn as_string_vec(items: &[Value]) -> Option<Vec<String>> {
    if items.is_empty() {
        return None;
    }
    items
        .iter()
        .map(|v| v.as_str().map(ToString::to_string))
        .collect()
}

/// Structural validation of a raw style document, producing one message per
/// problem. This is the seam for an external style-spec validator; the
/// built-in checks cover what the container contract depends on.
#[must_use]
pub fn check_style(style: &Value) -> Vec<String> {
    let mut messages = Vec::new();
    let Some(obj) = style.as_object() else {
        return vec!["style must be a JSON object".to_string()];
    };

    match obj.get("version") {
        Some(v) if v.as_u64() == Some(STYLE_VERSION) => {}
        Some(v) => messages.push(format!("style version must be {STYLE_VERSION}, got {v}")),
        None => messages.push("style is missing required field \"version\"".to_string()),
    }

    match obj.get("sources") {
        Some(Value::Object(_)) => {}
        Some(_) => messages.push("\"sources\" must be an object".to_string()),
        None => messages.push("style is missing required field \"sources\"".to_string()),
    }

    match obj.get("layers") {
        Some(Value::Array(layers)) => {
            let mut seen = std::collections::HashSet::new();
            for (i, layer) in layers.iter().enumerate() {
                let Some(layer) = layer.as_object() else {
                    messages.push(format!("layer {i} must be an object"));
                    continue;
                };
                match layer.get("id").and_then(Value::as_str) {
                    Some(id) => {
                        if !seen.insert(id.to_string()) {
                            messages.push(format!("duplicate layer id \"{id}\""));
                        }
                    }
                    None => messages.push(format!("layer {i} is missing \"id\"")),
                }
                if layer.get("type").and_then(Value::as_str).is_none() {
                    messages.push(format!("layer {i} is missing \"type\""));
                }
            }
        }
        Some(_) => messages.push("\"layers\" must be an array".to_string()),
        None => messages.push("style is missing required field \"layers\"".to_string()),
    }

    if let Some(glyphs) = obj.get("glyphs") {
        if !glyphs.is_string() {
            messages.push("\"glyphs\" must be a string".to_string());
        }
    }
    if let Some(sprite) = obj.get("sprite") {
        if !sprite.is_string() && !sprite.is_array() {
            messages.push("\"sprite\" must be a string or an array".to_string());
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn sample_style() -> Value {
        json!({
            "version": 8,
            "name": "Test style",
            "center": [13.4, 52.5],
            "glyphs": "https://fonts.example.com/{fontstack}/{range}.pbf",
            "sprite": "https://sprites.example.com/base",
            "sources": {
                "osm": {
                    "type": "vector",
                    "tiles": ["https://t.example.com/{z}/{x}/{y}.mvt"],
                    "maxzoom": 14,
                    "attribution": "© OSM"
                },
                "sat": {
                    "type": "raster",
                    "url": "https://t.example.com/sat.json",
                    "tileSize": 256
                },
                "points": {
                    "type": "geojson",
                    "data": {"type": "FeatureCollection", "features": [], "bbox": [1.0, 2.0, 3.0, 4.0]}
                },
                "terrain": {
                    "type": "raster-dem",
                    "url": "https://t.example.com/dem.json"
                }
            },
            "layers": [
                {
                    "id": "water",
                    "type": "fill",
                    "source": "osm",
                    "source-layer": "water",
                    "paint": {"fill-color": "#00f"}
                },
                {
                    "id": "labels",
                    "type": "symbol",
                    "source": "osm",
                    "source-layer": "place",
                    "layout": {"text-font": ["Noto Sans Regular", "Arial Unicode MS Regular"]}
                }
            ]
        })
    }

    #[test]
    fn test_roundtrip_preserves_unknown_fields() {
        let input = sample_style();
        let doc: StyleDocument = serde_json::from_value(input.clone()).unwrap();
        let output = serde_json::to_value(&doc).unwrap();

        assert_eq!(output["name"], input["name"]);
        assert_eq!(output["center"], input["center"]);
        assert_eq!(output["sources"]["osm"]["attribution"], json!("© OSM"));
        assert_eq!(output["sources"]["osm"]["type"], json!("vector"));
        assert_eq!(output["sources"]["sat"]["tileSize"], json!(256));
        assert_eq!(output["sources"]["terrain"], input["sources"]["terrain"]);
        assert_eq!(output["layers"][0]["paint"], input["layers"][0]["paint"]);
    }

    #[test]
    fn test_source_variants() {
        let doc: StyleDocument = serde_json::from_value(sample_style()).unwrap();
        assert!(matches!(doc.sources["osm"], Source::Vector(_)));
        assert!(matches!(doc.sources["sat"], Source::Raster(_)));
        assert!(matches!(doc.sources["points"], Source::GeoJson(_)));
        assert!(matches!(doc.sources["terrain"], Source::Other(_)));
    }

    #[test]
    fn test_geojson_data_bbox() {
        let doc: StyleDocument = serde_json::from_value(sample_style()).unwrap();
        let Source::GeoJson(source) = &doc.sources["points"] else {
            panic!("expected geojson source");
        };
        assert_eq!(source.data_bbox(), Some([1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn test_font_stacks_literal() {
        let doc: StyleDocument = serde_json::from_value(sample_style()).unwrap();
        assert_eq!(
            doc.font_stacks(),
            vec![vec![
                "Noto Sans Regular".to_string(),
                "Arial Unicode MS Regular".to_string()
            ]]
        );
    }

    #[test]
    fn test_font_stacks_expression() {
        let mut style = sample_style();
        style["layers"][1]["layout"]["text-font"] = json!([
            "step",
            ["zoom"],
            ["literal", ["Noto Sans Bold"]],
            10,
            ["literal", ["Noto Sans Regular", "Arial Unicode MS Regular"]]
        ]);
        let doc: StyleDocument = serde_json::from_value(style).unwrap();
        assert_eq!(
            doc.font_stacks(),
            vec![
                vec!["Noto Sans Bold".to_string()],
                vec![
                    "Noto Sans Regular".to_string(),
                    "Arial Unicode MS Regular".to_string()
                ]
            ]
        );
    }

    #[test]
    fn test_replace_font_stacks() {
        let mut doc: StyleDocument = serde_json::from_value(sample_style()).unwrap();
        doc.replace_font_stacks(&["Arial Unicode MS Regular".to_string()]);
        let layout = doc.layers[1].layout.as_ref().unwrap();
        assert_eq!(layout["text-font"], json!(["Arial Unicode MS Regular"]));
    }

    #[test]
    fn test_replace_font_stacks_fallback() {
        let mut doc: StyleDocument = serde_json::from_value(sample_style()).unwrap();
        doc.replace_font_stacks(&["Open Sans Regular".to_string()]);
        let layout = doc.layers[1].layout.as_ref().unwrap();
        assert_eq!(layout["text-font"], json!(["Open Sans Regular"]));
    }

    #[test]
    fn test_sprite_def_forms() {
        let single: SpriteDef = serde_json::from_value(json!("https://s.example.com/x")).unwrap();
        assert_eq!(
            single.entries(),
            vec![("default".to_string(), "https://s.example.com/x".to_string())]
        );

        let multi: SpriteDef = serde_json::from_value(json!([
            {"id": "base", "url": "https://s.example.com/a"},
            {"id": "extra", "url": "https://s.example.com/b"}
        ]))
        .unwrap();
        assert_eq!(multi.entries().len(), 2);
        assert_eq!(multi.entries()[1].0, "extra");
    }

    #[test]
    fn test_check_style_ok() {
        assert_eq!(check_style(&sample_style()), Vec::<String>::new());
    }

    #[test]
    fn test_check_style_problems() {
        let style = json!({
            "version": 7,
            "layers": [
                {"id": "a", "type": "fill"},
                {"id": "a", "type": "fill"},
                {"type": "fill"}
            ]
        });
        let messages = check_style(&style);
        assert!(messages.iter().any(|m| m.contains("version")));
        assert!(messages.iter().any(|m| m.contains("sources")));
        assert!(messages.iter().any(|m| m.contains("duplicate layer id")));
        assert!(messages.iter().any(|m| m.contains("missing \"id\"")));
    }

    #[test]
    fn test_set_smp_metadata() {
        let mut doc: StyleDocument = serde_json::from_value(sample_style()).unwrap();
        let mut folders = BTreeMap::new();
        folders.insert("osm".to_string(), "osm".to_string());
        doc.set_smp_metadata([-1.0, -2.0, 3.0, 4.0], 12, Some(&folders));

        let metadata = doc.metadata.as_ref().unwrap();
        assert_eq!(metadata[METADATA_BOUNDS], json!([-1.0, -2.0, 3.0, 4.0]));
        assert_eq!(metadata[METADATA_MAXZOOM], json!(12));
        assert_eq!(metadata[METADATA_SOURCE_FOLDERS], json!({"osm": "osm"}));
    }
}
