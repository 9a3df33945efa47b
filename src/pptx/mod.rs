//! Lossless PPTX access: zip container, slide XML event streams, text
//! extraction and patch application.
//!
//! The package is never unzipped to disk. Slide parts are parsed into flat
//! event streams, patched in place, serialized back byte-compatibly and
//! written into a copy of the original container so that every untouched
//! entry (media, themes, notes, embedded OLE) survives bit for bit.

pub mod apply;
pub mod extract;
pub mod package;
pub mod xml;

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::ir::{ElementUpdate, Presentation, Slide};

use apply::apply_element_update;
use extract::extract_text_elements;
use package::PptxPackage;
use xml::{parse_xml_part, verify_structure_unchanged, write_xml_part};

static SLIDE_PART_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ppt/slides/slide(\d+)\.xml$").unwrap());

/// Slide part names in deck order (slide2 before slide10).
pub fn slide_part_names(pkg: &PptxPackage) -> Vec<String> {
    let mut numbered: Vec<(u64, String)> = pkg
        .entries
        .iter()
        .filter_map(|e| {
            let caps = SLIDE_PART_RE.captures(&e.name)?;
            let n: u64 = caps.get(1)?.as_str().parse().ok()?;
            Some((n, e.name.clone()))
        })
        .collect();
    numbered.sort();
    numbered.into_iter().map(|(_, name)| name).collect()
}

/// Parses a .pptx byte buffer into per-slide text elements with geometry.
pub fn parse_pptx(bytes: &[u8]) -> Result<Presentation> {
    let pkg = PptxPackage::from_bytes(bytes)?;
    let part_names = slide_part_names(&pkg);
    if part_names.is_empty() {
        return Err(Error::content("package contains no slide parts"));
    }

    let mut slides = Vec::with_capacity(part_names.len());
    for name in part_names {
        let entry = pkg
            .entry(&name)
            .ok_or_else(|| Error::structural(format!("{name}: slide entry vanished")))?;
        let part = parse_xml_part(&name, &entry.data)?;
        let elements = extract_text_elements(&part);
        slides.push(Slide {
            part_name: name,
            elements,
        });
    }
    Ok(Presentation { slides })
}

/// Rewrites the original package with the given element patches applied.
///
/// Only parts named by at least one update are re-serialized; every other
/// entry is copied through unchanged. Each patched part is re-fingerprinted
/// against its baseline before writing, so a structural drift aborts the
/// whole write instead of producing a corrupt deck.
pub fn write_translated_pptx(original: &[u8], updates: &[ElementUpdate]) -> Result<Vec<u8>> {
    let pkg = PptxPackage::from_bytes(original)?;

    let mut by_part: HashMap<&str, Vec<&ElementUpdate>> = HashMap::new();
    for u in updates {
        by_part.entry(u.node.part_name.as_str()).or_default().push(u);
    }

    let mut replacements: HashMap<String, Vec<u8>> = HashMap::new();
    for (part_name, part_updates) in by_part {
        let entry = pkg
            .entry(part_name)
            .ok_or_else(|| Error::Write(format!("{part_name}: no such part in package")))?;
        let mut part = parse_xml_part(part_name, &entry.data)?;
        for u in part_updates {
            apply_element_update(&mut part, u)?;
        }
        verify_structure_unchanged(&part)?;
        replacements.insert(part_name.to_string(), write_xml_part(&part)?);
    }

    pkg.write_with_replacements(&replacements)
}

/// Proves byte-exact serializer fidelity for every slide part.
///
/// Each slide is parsed, re-serialized without any edits and compared to the
/// stored bytes. Used by `--roundtrip-only` to vet a deck before spending
/// translation calls on it.
pub fn verify_pptx_roundtrip(bytes: &[u8]) -> Result<usize> {
    let pkg = PptxPackage::from_bytes(bytes)?;
    let part_names = slide_part_names(&pkg);
    if part_names.is_empty() {
        return Err(Error::content("package contains no slide parts"));
    }
    for name in &part_names {
        let entry = pkg
            .entry(name)
            .ok_or_else(|| Error::structural(format!("{name}: slide entry vanished")))?;
        let part = parse_xml_part(name, &entry.data)?;
        let rewritten = write_xml_part(&part)?;
        if rewritten != entry.data {
            return Err(Error::structural(format!(
                "{name}: serializer round-trip differs"
            )));
        }
        verify_structure_unchanged(&part)?;
    }
    Ok(part_names.len())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write as _;

    const SLIDE1: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:sld xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:cSld><p:spTree><p:sp><p:spPr><a:xfrm><a:off x="914400" y="914400"/><a:ext cx="4572000" cy="914400"/></a:xfrm></p:spPr><p:txBody><a:bodyPr lIns="91440" rIns="91440"/><a:p><a:r><a:rPr lang="ja-JP" sz="1800"/><a:t>日本語のタイトル</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#;

    const SLIDE_PLAIN: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:sld xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:cSld><p:spTree><p:sp><p:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="914400" cy="914400"/></a:xfrm></p:spPr><p:txBody><a:bodyPr/><a:p><a:r><a:t>body</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#;

    /// Builds an in-memory deck with the given slide payloads plus the
    /// non-slide entries a real package carries.
    pub(crate) fn sample_pptx(slides: &[(&str, &str)]) -> Vec<u8> {
        use zip::write::SimpleFileOptions;
        let cursor = std::io::Cursor::new(Vec::new());
        let mut zw = zip::ZipWriter::new(cursor);
        let deflated =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        let stored =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

        zw.start_file("[Content_Types].xml", deflated).unwrap();
        zw.write_all(br#"<?xml version="1.0"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#).unwrap();
        zw.start_file("ppt/presentation.xml", deflated).unwrap();
        zw.write_all(br#"<?xml version="1.0"?><p:presentation xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"/>"#).unwrap();
        for (name, payload) in slides {
            zw.start_file(*name, deflated).unwrap();
            zw.write_all(payload.as_bytes()).unwrap();
        }
        zw.start_file("ppt/media/image1.png", stored).unwrap();
        zw.write_all(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x01])
            .unwrap();
        zw.finish().unwrap().into_inner()
    }

    fn entry_map(bytes: &[u8]) -> HashMap<String, Vec<u8>> {
        PptxPackage::from_bytes(bytes)
            .expect("read back")
            .entries
            .into_iter()
            .map(|e| (e.name, e.data))
            .collect()
    }

    #[test]
    fn slides_come_back_in_deck_order() {
        let bytes = sample_pptx(&[
            ("ppt/slides/slide10.xml", SLIDE_PLAIN),
            ("ppt/slides/slide2.xml", SLIDE_PLAIN),
            ("ppt/slides/slide1.xml", SLIDE1),
        ]);
        let pres = parse_pptx(&bytes).expect("parse");
        let names: Vec<&str> = pres.slides.iter().map(|s| s.part_name.as_str()).collect();
        assert_eq!(
            names,
            [
                "ppt/slides/slide1.xml",
                "ppt/slides/slide2.xml",
                "ppt/slides/slide10.xml"
            ]
        );
        assert_eq!(pres.slides[0].elements[0].text, "日本語のタイトル");
        assert_eq!(pres.slides[0].elements[0].position.margin, 91_440);
    }

    #[test]
    fn deck_without_slides_is_a_content_error() {
        let bytes = sample_pptx(&[]);
        let err = parse_pptx(&bytes).expect_err("must fail");
        assert!(matches!(err, Error::Content(_)));
    }

    #[test]
    fn garbage_bytes_are_a_structural_error() {
        let err = parse_pptx(b"this is not a zip archive").expect_err("must fail");
        assert!(matches!(err, Error::StructuralParse(_)));
    }

    #[test]
    fn write_touches_only_named_parts() {
        let bytes = sample_pptx(&[
            ("ppt/slides/slide1.xml", SLIDE1),
            ("ppt/slides/slide2.xml", SLIDE_PLAIN),
        ]);
        let pres = parse_pptx(&bytes).expect("parse");
        let el = &pres.slides[0].elements[0];

        let mut update = ElementUpdate::for_node(el.node.clone());
        update.text = Some("Japanese Title".to_string());
        update.insets = Some((45_720, 45_720));
        update.font_sz = Some(1500);

        let out = write_translated_pptx(&bytes, &[update]).expect("write");
        let before = entry_map(&bytes);
        let after = entry_map(&out);
        assert_eq!(before.len(), after.len());

        for (name, data) in &before {
            if name == "ppt/slides/slide1.xml" {
                let xml = String::from_utf8(after[name].clone()).expect("utf8");
                assert!(xml.contains("<a:t>Japanese Title</a:t>"));
                assert!(xml.contains(r#"lIns="45720""#));
                assert!(xml.contains(r#"sz="1500""#));
            } else {
                assert_eq!(data, &after[name], "entry {name} must pass through untouched");
            }
        }
    }

    #[test]
    fn write_with_no_updates_preserves_every_part() {
        let bytes = sample_pptx(&[("ppt/slides/slide1.xml", SLIDE1)]);
        let out = write_translated_pptx(&bytes, &[]).expect("write");
        assert_eq!(entry_map(&bytes), entry_map(&out));
    }

    #[test]
    fn rewriting_with_the_same_updates_is_idempotent() {
        let bytes = sample_pptx(&[("ppt/slides/slide1.xml", SLIDE1)]);
        let pres = parse_pptx(&bytes).expect("parse");
        let mut update = ElementUpdate::for_node(pres.slides[0].elements[0].node.clone());
        update.text = Some("Japanese Title".to_string());
        update.insets = Some((45_720, 45_720));
        update.font_sz = Some(1500);
        let updates = vec![update];

        let once = write_translated_pptx(&bytes, &updates).expect("first write");
        let twice = write_translated_pptx(&once, &updates).expect("second write");
        assert_eq!(entry_map(&once), entry_map(&twice));
    }

    #[test]
    fn update_against_missing_part_fails_the_write() {
        let bytes = sample_pptx(&[("ppt/slides/slide1.xml", SLIDE1)]);
        let pres = parse_pptx(&bytes).expect("parse");
        let mut node = pres.slides[0].elements[0].node.clone();
        node.part_name = "ppt/slides/slide9.xml".to_string();
        let mut update = ElementUpdate::for_node(node);
        update.text = Some("x".to_string());
        assert!(matches!(
            write_translated_pptx(&bytes, &[update]),
            Err(Error::Write(_))
        ));
    }

    #[test]
    fn roundtrip_verification_covers_all_slides() {
        let bytes = sample_pptx(&[
            ("ppt/slides/slide1.xml", SLIDE1),
            ("ppt/slides/slide2.xml", SLIDE_PLAIN),
        ]);
        assert_eq!(verify_pptx_roundtrip(&bytes).expect("roundtrip"), 2);
    }
}
