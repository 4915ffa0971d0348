//! Layered structural audit of an SMP file.
//!
//! Problems are aggregated, never thrown: the audit keeps going after an
//! error wherever later levels can still produce useful findings, and only
//! stops when there is nothing left to inspect (unreadable archive,
//! missing or unparseable style).

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde_json::Value;
use zip::ZipArchive;

use crate::style::{METADATA_BOUNDS, METADATA_MAXZOOM, METADATA_SOURCE_FOLDERS, check_style};
use crate::uri::{SMP_URI_PREFIX, STYLE_PATH, SUPPORTED_MAJORS, VERSION_PATH};

/// The audit result. `valid` reflects errors only; warnings point at
/// degraded-but-usable packages.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn finish(mut self) -> Self {
        self.valid = self.errors.is_empty();
        self
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Audit the SMP file at `path`.
#[must_use]
pub fn validate(path: &Path) -> ValidationReport {
    let mut report = ValidationReport::default();

    // L1: readable file, parseable ZIP
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            report.error(format!("File not found: {}", path.display()));
            return report.finish();
        }
        Err(e) => {
            report.error(format!("Cannot open {}: {e}", path.display()));
            return report.finish();
        }
    };
    let mut archive = match ZipArchive::new(BufReader::new(file)) {
        Ok(archive) => archive,
        Err(e) => {
            report.error(format!("Not a valid ZIP archive: {e}"));
            return report.finish();
        }
    };
    let entries: Vec<String> = archive.file_names().map(ToString::to_string).collect();

    // L2: VERSION grammar and supported majors
    match read_entry(&mut archive, VERSION_PATH) {
        Some(content) => check_version(&content, &mut report),
        None => report.warning("Missing VERSION file"),
    }

    // L3: style.json present
    let Some(style_bytes) = read_entry(&mut archive, STYLE_PATH) else {
        report.error("style.json not found in archive");
        return report.finish();
    };

    // L4: parseable and structurally sound style
    let style: Value = match serde_json::from_slice(&style_bytes) {
        Ok(style) => style,
        Err(e) => {
            report.error(format!("style.json is not valid JSON: {e}"));
            return report.finish();
        }
    };
    for message in check_style(&style) {
        report.error(message);
    }

    check_metadata(&style, &mut report);
    check_tile_entries(&style, &entries, &mut report);
    check_glyph_entries(&style, &entries, &mut report);
    check_sprite_entries(&style, &entries, &mut report);

    report.finish()
}

fn read_entry<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>, name: &str) -> Option<Vec<u8>> {
    let mut entry = archive.by_name(name).ok()?;
    let mut data = Vec::new();
    entry.read_to_end(&mut data).ok()?;
    Some(data)
}

fn check_version(content: &[u8], report: &mut ValidationReport) {
    let text = String::from_utf8_lossy(content);
    let parsed = text
        .strip_suffix('\n')
        .and_then(|v| v.split_once('.'))
        .and_then(|(major, minor)| {
            let major: u32 = major.parse().ok()?;
            let _: u32 = minor.parse().ok()?;
            Some(major)
        });
    match parsed {
        Some(major) if SUPPORTED_MAJORS.contains(&major) => {}
        Some(major) => report.error(format!("Unsupported major version: {major}")),
        None => report.error(format!("Invalid VERSION content: {text:?}")),
    }
}

/// L5: required `smp:*` metadata. Absence is an error, malformed shapes
/// degrade to warnings.
fn check_metadata(style: &Value, report: &mut ValidationReport) {
    let metadata = style.get("metadata").and_then(Value::as_object);

    match metadata.and_then(|m| m.get(METADATA_BOUNDS)) {
        None => report.error(format!("Missing required metadata \"{METADATA_BOUNDS}\"")),
        Some(Value::Array(bounds))
            if bounds.len() == 4 && bounds.iter().all(Value::is_number) => {}
        Some(_) => report.warning(format!(
            "Metadata \"{METADATA_BOUNDS}\" should be an array of 4 numbers"
        )),
    }

    match metadata.and_then(|m| m.get(METADATA_MAXZOOM)) {
        None => report.error(format!("Missing required metadata \"{METADATA_MAXZOOM}\"")),
        Some(v) if v.is_number() => {}
        Some(_) => report.warning(format!("Metadata \"{METADATA_MAXZOOM}\" should be a number")),
    }

    if let Some(folders) = metadata.and_then(|m| m.get(METADATA_SOURCE_FOLDERS)) {
        if !folders.is_object() {
            report.warning(format!(
                "Metadata \"{METADATA_SOURCE_FOLDERS}\" should be an object"
            ));
        }
    }
}

/// L6: every internally-referenced tile source has at least one tile file.
fn check_tile_entries(style: &Value, entries: &[String], report: &mut ValidationReport) {
    let Some(sources) = style.get("sources").and_then(Value::as_object) else {
        return;
    };
    for (id, source) in sources {
        let Some(template) = source
            .get("tiles")
            .and_then(Value::as_array)
            .and_then(|t| t.first())
            .and_then(Value::as_str)
        else {
            continue;
        };
        let Some(path) = template.strip_prefix(SMP_URI_PREFIX) else {
            continue;
        };
        let Some((prefix, _)) = path.split_once("{z}") else {
            report.error(format!(
                "Tile template for source \"{id}\" has no {{z}} placeholder"
            ));
            continue;
        };
        if !entries.iter().any(|e| e.starts_with(prefix)) {
            report.error(format!("No tile files found for source \"{id}\""));
        }
    }
}

/// L7: an internal glyphs template has at least one matching range.
fn check_glyph_entries(style: &Value, entries: &[String], report: &mut ValidationReport) {
    let Some(template) = style.get("glyphs").and_then(Value::as_str) else {
        return;
    };
    let Some(path) = template.strip_prefix(SMP_URI_PREFIX) else {
        return;
    };
    let found = match path.split_once("{fontstack}") {
        Some((prefix, _)) if !prefix.is_empty() => {
            entries.iter().any(|e| e.starts_with(prefix))
        }
        _ => entries.iter().any(|e| e.ends_with(".pbf.gz")),
    };
    if !found {
        report.error("No glyph files found in archive");
    }
}

/// L8: internal sprites have their 1x files; missing @2x is a warning.
fn check_sprite_entries(style: &Value, entries: &[String], report: &mut ValidationReport) {
    let mut sprites: Vec<(String, &str)> = Vec::new();
    match style.get("sprite") {
        Some(Value::String(url)) => sprites.push(("default".to_string(), url)),
        Some(Value::Array(list)) => {
            for item in list {
                if let Some(url) = item.get("url").and_then(Value::as_str) {
                    let id = item
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or("default");
                    sprites.push((id.to_string(), url));
                }
            }
        }
        _ => {}
    }

    let has = |name: &str| entries.iter().any(|e| e == name);
    for (id, url) in sprites {
        let Some(base) = url.strip_prefix(SMP_URI_PREFIX) else {
            continue;
        };
        for ext in [".json", ".png"] {
            let path = format!("{base}{ext}");
            if !has(&path) {
                report.error(format!("Missing sprite file: {path}"));
            }
        }
        if !(has(&format!("{base}@2x.json")) && has(&format!("{base}@2x.png"))) {
            report.warning(format!("Sprite \"{id}\" has no @2x variants"));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write as _};

    use serde_json::json;
    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::test_utils::{gzipped, minimal_smp_bytes, minimal_style};

    fn write_file(bytes: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package.smp");
        std::fs::write(&path, bytes).unwrap();
        (dir, path)
    }

    fn build_zip(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn style_bytes() -> Vec<u8> {
        serde_json::to_vec(&minimal_style()).unwrap()
    }

    #[test]
    fn test_writer_produced_package_is_clean() {
        let (_dir, path) = write_file(&minimal_smp_bytes());
        let report = validate(&path);
        assert!(report.valid, "errors: {:?}", report.errors);
        assert_eq!(report.errors, Vec::<String>::new());
        assert_eq!(report.warnings, Vec::<String>::new());
    }

    #[test]
    fn test_nonexistent_file() {
        let report = validate(Path::new("/no/such/package.smp"));
        assert!(!report.valid);
        assert!(report.errors[0].contains("File not found"));
    }

    #[test]
    fn test_not_a_zip() {
        let (_dir, path) = write_file(b"just some random bytes, not an archive");
        let report = validate(&path);
        assert!(!report.valid);
        assert!(report.errors[0].contains("Not a valid ZIP"));
    }

    #[test]
    fn test_unsupported_major_version() {
        let bytes = build_zip(&[
            ("VERSION", b"2.0\n".to_vec()),
            ("style.json", style_bytes()),
            ("s/osm/0/0/0.mvt.gz", gzipped(b"tile")),
            ("fonts/Noto Sans Regular/0-255.pbf.gz", gzipped(b"glyphs")),
            ("sprites/default/sprite.json", b"{}".to_vec()),
            ("sprites/default/sprite.png", b"png".to_vec()),
        ]);
        let (_dir, path) = write_file(&bytes);
        let report = validate(&path);
        assert!(!report.valid);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("Unsupported major version")));
    }

    #[test]
    fn test_minor_version_is_forwards_compatible() {
        let bytes = build_zip(&[
            ("VERSION", b"1.1\n".to_vec()),
            ("style.json", style_bytes()),
            ("s/osm/0/0/0.mvt.gz", gzipped(b"tile")),
            ("fonts/Noto Sans Regular/0-255.pbf.gz", gzipped(b"glyphs")),
            ("sprites/default/sprite.json", b"{}".to_vec()),
            ("sprites/default/sprite.png", b"png".to_vec()),
        ]);
        let (_dir, path) = write_file(&bytes);
        let report = validate(&path);
        assert!(report.valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn test_bad_version_grammar() {
        let bytes = build_zip(&[
            ("VERSION", b"1.0".to_vec()), // missing trailing newline
            ("style.json", style_bytes()),
            ("s/osm/0/0/0.mvt.gz", gzipped(b"tile")),
            ("fonts/Noto Sans Regular/0-255.pbf.gz", gzipped(b"glyphs")),
            ("sprites/default/sprite.json", b"{}".to_vec()),
            ("sprites/default/sprite.png", b"png".to_vec()),
        ]);
        let (_dir, path) = write_file(&bytes);
        let report = validate(&path);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("Invalid VERSION")));
    }

    #[test]
    fn test_missing_version_is_a_warning() {
        let bytes = build_zip(&[
            ("style.json", style_bytes()),
            ("s/osm/0/0/0.mvt.gz", gzipped(b"tile")),
            ("fonts/Noto Sans Regular/0-255.pbf.gz", gzipped(b"glyphs")),
            ("sprites/default/sprite.json", b"{}".to_vec()),
            ("sprites/default/sprite.png", b"png".to_vec()),
        ]);
        let (_dir, path) = write_file(&bytes);
        let report = validate(&path);
        assert!(report.valid, "errors: {:?}", report.errors);
        assert!(report.warnings.iter().any(|w| w.contains("VERSION")));
    }

    #[test]
    fn test_missing_style() {
        let bytes = build_zip(&[("VERSION", b"1.0\n".to_vec())]);
        let (_dir, path) = write_file(&bytes);
        let report = validate(&path);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("style.json")));
    }

    #[test]
    fn test_no_tile_files() {
        let bytes = build_zip(&[
            ("VERSION", b"1.0\n".to_vec()),
            ("style.json", style_bytes()),
            ("fonts/Noto Sans Regular/0-255.pbf.gz", gzipped(b"glyphs")),
            ("sprites/default/sprite.json", b"{}".to_vec()),
            ("sprites/default/sprite.png", b"png".to_vec()),
        ]);
        let (_dir, path) = write_file(&bytes);
        let report = validate(&path);
        assert!(!report.valid);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains(r#"No tile files found for source "osm""#)));
    }

    #[test]
    fn test_missing_2x_sprites_is_a_warning() {
        let bytes = build_zip(&[
            ("VERSION", b"1.0\n".to_vec()),
            ("style.json", style_bytes()),
            ("s/osm/0/0/0.mvt.gz", gzipped(b"tile")),
            ("fonts/Noto Sans Regular/0-255.pbf.gz", gzipped(b"glyphs")),
            ("sprites/default/sprite.json", b"{}".to_vec()),
            ("sprites/default/sprite.png", b"png".to_vec()),
        ]);
        let (_dir, path) = write_file(&bytes);
        let report = validate(&path);
        assert!(report.valid, "errors: {:?}", report.errors);
        assert!(report.warnings.iter().any(|w| w.contains("@2x")));
    }

    #[test]
    fn test_missing_1x_sprite_is_an_error() {
        let bytes = build_zip(&[
            ("VERSION", b"1.0\n".to_vec()),
            ("style.json", style_bytes()),
            ("s/osm/0/0/0.mvt.gz", gzipped(b"tile")),
            ("fonts/Noto Sans Regular/0-255.pbf.gz", gzipped(b"glyphs")),
            ("sprites/default/sprite.json", b"{}".to_vec()),
        ]);
        let (_dir, path) = write_file(&bytes);
        let report = validate(&path);
        assert!(!report.valid);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("sprites/default/sprite.png")));
    }

    #[test]
    fn test_no_glyphs() {
        let bytes = build_zip(&[
            ("VERSION", b"1.0\n".to_vec()),
            ("style.json", style_bytes()),
            ("s/osm/0/0/0.mvt.gz", gzipped(b"tile")),
            ("sprites/default/sprite.json", b"{}".to_vec()),
            ("sprites/default/sprite.png", b"png".to_vec()),
        ]);
        let (_dir, path) = write_file(&bytes);
        let report = validate(&path);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("No glyph files")));
    }

    #[test]
    fn test_missing_metadata() {
        let mut style = minimal_style();
        style["metadata"] = json!({});
        let bytes = build_zip(&[
            ("VERSION", b"1.0\n".to_vec()),
            ("style.json", serde_json::to_vec(&style).unwrap()),
            ("s/osm/0/0/0.mvt.gz", gzipped(b"tile")),
            ("fonts/Noto Sans Regular/0-255.pbf.gz", gzipped(b"glyphs")),
            ("sprites/default/sprite.json", b"{}".to_vec()),
            ("sprites/default/sprite.png", b"png".to_vec()),
        ]);
        let (_dir, path) = write_file(&bytes);
        let report = validate(&path);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("smp:bounds")));
        assert!(report.errors.iter().any(|e| e.contains("smp:maxzoom")));
    }

    #[test]
    fn test_malformed_metadata_is_a_warning() {
        let mut style = minimal_style();
        style["metadata"] = json!({
            "smp:bounds": "not an array",
            "smp:maxzoom": "not a number",
            "smp:sourceFolders": 7
        });
        let bytes = build_zip(&[
            ("VERSION", b"1.0\n".to_vec()),
            ("style.json", serde_json::to_vec(&style).unwrap()),
            ("s/osm/0/0/0.mvt.gz", gzipped(b"tile")),
            ("fonts/Noto Sans Regular/0-255.pbf.gz", gzipped(b"glyphs")),
            ("sprites/default/sprite.json", b"{}".to_vec()),
            ("sprites/default/sprite.png", b"png".to_vec()),
        ]);
        let (_dir, path) = write_file(&bytes);
        let report = validate(&path);
        assert!(report.valid, "errors: {:?}", report.errors);
        assert_eq!(report.warnings.len(), 3);
    }

    #[test]
    fn test_audit_continues_after_metadata_error() {
        // broken metadata AND no tiles: both findings must appear
        let mut style = minimal_style();
        style.as_object_mut().unwrap().remove("metadata");
        let bytes = build_zip(&[
            ("VERSION", b"1.0\n".to_vec()),
            ("style.json", serde_json::to_vec(&style).unwrap()),
        ]);
        let (_dir, path) = write_file(&bytes);
        let report = validate(&path);
        assert!(report.errors.iter().any(|e| e.contains("smp:bounds")));
        assert!(report.errors.iter().any(|e| e.contains("No tile files")));
        assert!(report.errors.iter().any(|e| e.contains("No glyph files")));
    }
}
