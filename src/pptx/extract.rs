use crate::ir::{Position, TextElement, TextNodeRef};

use super::xml::{XmlEvent, XmlPart};

/// Default DrawingML horizontal body insets, EMU.
pub const DEFAULT_INSET: i64 = 91_440;

#[derive(Default, Clone, Copy)]
struct ShapeGeom {
    x: Option<i64>,
    y: Option<i64>,
    cx: Option<i64>,
    cy: Option<i64>,
}

#[derive(Clone, Copy)]
struct BodyInsets {
    event_index: usize,
    left: i64,
    right: i64,
}

#[derive(Default, Clone, Copy)]
struct RunStyle {
    rpr_event_index: Option<usize>,
    sz: Option<u32>,
}

/// Walks one slide part and lists its text runs in document order.
///
/// Geometry comes from the enclosing `p:sp` (`a:off`/`a:ext`), margins from
/// the enclosing `a:bodyPr` insets. Runs outside a shape (e.g. table cells)
/// get zeroed geometry. Runs with empty content are not listed.
pub fn extract_text_elements(part: &XmlPart) -> Vec<TextElement> {
    let mut elements: Vec<TextElement> = Vec::new();

    let mut sp_stack: Vec<ShapeGeom> = Vec::new();
    let mut in_sp_pr = false;
    let mut txbody_stack: Vec<Option<BodyInsets>> = Vec::new();
    let mut run_stack: Vec<RunStyle> = Vec::new();
    let mut pending_text_elem: Option<usize> = None;

    for (idx, ev) in part.events.iter().enumerate() {
        match ev {
            XmlEvent::Start { name, attrs } => match name.as_str() {
                "p:sp" => sp_stack.push(ShapeGeom::default()),
                "p:spPr" => in_sp_pr = !sp_stack.is_empty(),
                "p:txBody" | "a:txBody" => txbody_stack.push(None),
                "a:bodyPr" => {
                    if let Some(slot) = txbody_stack.last_mut() {
                        *slot = Some(read_insets(idx, attrs));
                    }
                }
                "a:r" => run_stack.push(RunStyle::default()),
                "a:rPr" => record_rpr(&mut run_stack, idx, attrs),
                "a:t" => pending_text_elem = Some(idx),
                "a:off" if in_sp_pr => record_off(&mut sp_stack, attrs),
                "a:ext" if in_sp_pr => record_ext(&mut sp_stack, attrs),
                _ => {}
            },
            XmlEvent::Empty { name, attrs } => match name.as_str() {
                "a:bodyPr" => {
                    if let Some(slot) = txbody_stack.last_mut() {
                        *slot = Some(read_insets(idx, attrs));
                    }
                }
                "a:rPr" => record_rpr(&mut run_stack, idx, attrs),
                "a:off" if in_sp_pr => record_off(&mut sp_stack, attrs),
                "a:ext" if in_sp_pr => record_ext(&mut sp_stack, attrs),
                _ => {}
            },
            XmlEvent::End { name } => match name.as_str() {
                "p:sp" => {
                    sp_stack.pop();
                }
                "p:spPr" => in_sp_pr = false,
                "p:txBody" | "a:txBody" => {
                    txbody_stack.pop();
                }
                "a:r" => {
                    run_stack.pop();
                }
                "a:t" => pending_text_elem = None,
                _ => {}
            },
            XmlEvent::Text { text } => {
                let Some(elem_idx) = pending_text_elem else {
                    continue;
                };
                if text.is_empty() {
                    continue;
                }
                let geom = sp_stack.last().copied().unwrap_or_default();
                let insets = txbody_stack.last().copied().flatten();
                let style = run_stack.last().copied().unwrap_or_default();
                elements.push(TextElement {
                    text: text.clone(),
                    position: position_from(geom, insets),
                    font_sz: style.sz,
                    node: TextNodeRef {
                        part_name: part.name.clone(),
                        elem_event_index: elem_idx,
                        text_event_index: idx,
                        rpr_event_index: style.rpr_event_index,
                        body_pr_event_index: insets.map(|b| b.event_index),
                    },
                });
            }
            _ => {}
        }
    }

    elements
}

fn position_from(geom: ShapeGeom, insets: Option<BodyInsets>) -> Position {
    let (left, right) = insets
        .map(|b| (b.left, b.right))
        .unwrap_or((DEFAULT_INSET, DEFAULT_INSET));
    let (margin, margin_left, margin_right) = if left == right {
        (left, None, None)
    } else {
        ((left + right) / 2, Some(left), Some(right))
    };
    Position {
        x: geom.x.unwrap_or(0),
        y: geom.y.unwrap_or(0),
        width: geom.cx.unwrap_or(0),
        height: geom.cy.unwrap_or(0),
        margin,
        margin_left,
        margin_right,
    }
}

// DrawingML insets are non-negative; clamp junk values so margins stay
// usable downstream.
fn read_insets(idx: usize, attrs: &[(String, String)]) -> BodyInsets {
    BodyInsets {
        event_index: idx,
        left: attr_i64(attrs, "lIns").unwrap_or(DEFAULT_INSET).max(0),
        right: attr_i64(attrs, "rIns").unwrap_or(DEFAULT_INSET).max(0),
    }
}

fn record_rpr(run_stack: &mut [RunStyle], idx: usize, attrs: &[(String, String)]) {
    if let Some(top) = run_stack.last_mut() {
        top.rpr_event_index = Some(idx);
        top.sz = attr_i64(attrs, "sz").and_then(|v| u32::try_from(v).ok());
    }
}

fn record_off(sp_stack: &mut [ShapeGeom], attrs: &[(String, String)]) {
    if let Some(top) = sp_stack.last_mut() {
        top.x = attr_i64(attrs, "x");
        top.y = attr_i64(attrs, "y");
    }
}

fn record_ext(sp_stack: &mut [ShapeGeom], attrs: &[(String, String)]) {
    if let Some(top) = sp_stack.last_mut() {
        top.cx = attr_i64(attrs, "cx");
        top.cy = attr_i64(attrs, "cy");
    }
}

fn attr_i64(attrs: &[(String, String)], key: &str) -> Option<i64> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.trim().parse::<i64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pptx::xml::parse_xml_part;

    const SLIDE: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:sld xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main">
<p:cSld><p:spTree>
<p:sp>
<p:nvSpPr><p:cNvPr id="2" name="Title 1"/><p:cNvSpPr/><p:nvPr/></p:nvSpPr>
<p:spPr><a:xfrm><a:off x="914400" y="685800"/><a:ext cx="7772400" cy="1143000"/></a:xfrm></p:spPr>
<p:txBody>
<a:bodyPr lIns="91440" rIns="91440"/>
<a:p><a:r><a:rPr lang="ja-JP" sz="2400"/><a:t>四半期の業績</a:t></a:r></a:p>
</p:txBody>
</p:sp>
<p:sp>
<p:nvSpPr><p:cNvPr id="3" name="Body 2"/><p:cNvSpPr/><p:nvPr/></p:nvSpPr>
<p:spPr><a:xfrm><a:off x="914400" y="1828800"/><a:ext cx="7772400" cy="3429000"/></a:xfrm></p:spPr>
<p:txBody>
<a:bodyPr lIns="45720" rIns="137160"/>
<a:p>
<a:r><a:rPr lang="ja-JP"/><a:t>売上高</a:t></a:r>
<a:r><a:t>は前年比</a:t></a:r>
</a:p>
</p:txBody>
</p:sp>
</p:spTree></p:cSld>
</p:sld>"#;

    #[test]
    fn elements_follow_document_order_with_geometry() {
        let part = parse_xml_part("ppt/slides/slide1.xml", SLIDE.as_bytes()).expect("parse");
        let els = extract_text_elements(&part);
        assert_eq!(els.len(), 3);

        assert_eq!(els[0].text, "四半期の業績");
        assert_eq!(els[0].position.x, 914_400);
        assert_eq!(els[0].position.width, 7_772_400);
        assert_eq!(els[0].position.margin, 91_440);
        assert_eq!(els[0].position.margin_left, None);
        assert_eq!(els[0].font_sz, Some(2400));
        assert!(els[0].node.body_pr_event_index.is_some());

        assert_eq!(els[1].text, "売上高");
        assert_eq!(els[1].position.margin_left, Some(45_720));
        assert_eq!(els[1].position.margin_right, Some(137_160));
        assert_eq!(els[1].position.margin, (45_720 + 137_160) / 2);
        assert_eq!(els[1].font_sz, None);

        assert_eq!(els[2].text, "は前年比");
        assert_eq!(els[2].node.rpr_event_index, None);
    }

    #[test]
    fn slide_without_text_yields_no_elements() {
        let xml = r#"<?xml version="1.0"?><p:sld><p:cSld><p:spTree/></p:cSld></p:sld>"#;
        let part = parse_xml_part("ppt/slides/slide1.xml", xml.as_bytes()).expect("parse");
        assert!(extract_text_elements(&part).is_empty());
    }

    #[test]
    fn missing_body_pr_falls_back_to_default_insets() {
        let xml = r#"<?xml version="1.0"?><p:sld><p:sp><p:txBody><a:p><a:r><a:t>hi</a:t></a:r></a:p></p:txBody></p:sp></p:sld>"#;
        let part = parse_xml_part("ppt/slides/slide1.xml", xml.as_bytes()).expect("parse");
        let els = extract_text_elements(&part);
        assert_eq!(els.len(), 1);
        assert_eq!(els[0].position.margin, DEFAULT_INSET);
        assert_eq!(els[0].node.body_pr_event_index, None);
    }

    #[test]
    fn table_cell_text_gets_zeroed_geometry() {
        let xml = r#"<?xml version="1.0"?><p:sld><a:tbl><a:tr><a:tc><a:txBody><a:bodyPr/><a:p><a:r><a:t>cell</a:t></a:r></a:p></a:txBody></a:tc></a:tr></a:tbl></p:sld>"#;
        let part = parse_xml_part("ppt/slides/slide1.xml", xml.as_bytes()).expect("parse");
        let els = extract_text_elements(&part);
        assert_eq!(els.len(), 1);
        assert_eq!(els[0].position.width, 0);
        assert_eq!(els[0].position.margin, DEFAULT_INSET);
        assert!(els[0].node.body_pr_event_index.is_some());
    }
}
