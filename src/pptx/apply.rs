use crate::error::{Error, Result};
use crate::ir::ElementUpdate;

use super::xml::{XmlEvent, XmlPart};

/// Applies one element's patch to its part: run text, body insets, run size.
pub fn apply_element_update(part: &mut XmlPart, update: &ElementUpdate) -> Result<()> {
    if let Some(text) = update.text.as_deref() {
        apply_run_text(part, update.node.elem_event_index, update.node.text_event_index, text)?;
    }
    if let Some((left, right)) = update.insets {
        let idx = update.node.body_pr_event_index.ok_or_else(|| {
            Error::Write(format!("{}: inset update without a:bodyPr", part.name))
        })?;
        expect_named(part, idx, "a:bodyPr")?;
        let ev = event_mut(part, idx)?;
        set_attr_value(ev, "lIns", &left.to_string());
        set_attr_value(ev, "rIns", &right.to_string());
    }
    if let Some(sz) = update.font_sz {
        let idx = update.node.rpr_event_index.ok_or_else(|| {
            Error::Write(format!("{}: size update without a:rPr", part.name))
        })?;
        expect_named(part, idx, "a:rPr")?;
        let ev = event_mut(part, idx)?;
        set_attr_value(ev, "sz", &sz.to_string());
    }
    Ok(())
}

fn apply_run_text(
    part: &mut XmlPart,
    elem_index: usize,
    text_index: usize,
    new_text: &str,
) -> Result<()> {
    match part.events.get_mut(text_index) {
        Some(XmlEvent::Text { text }) => *text = new_text.to_string(),
        _ => {
            return Err(Error::Write(format!(
                "{}: expected text event at {text_index}",
                part.name
            )))
        }
    }
    if new_text.starts_with(' ') || new_text.ends_with(' ') {
        let ev = event_mut(part, elem_index)?;
        set_attr_value(ev, "xml:space", "preserve");
    }
    Ok(())
}

fn event_mut(part: &mut XmlPart, idx: usize) -> Result<&mut XmlEvent> {
    let name = part.name.clone();
    part.events
        .get_mut(idx)
        .ok_or_else(|| Error::Write(format!("{name}: event index {idx} out of range")))
}

fn expect_named(part: &XmlPart, idx: usize, expected: &str) -> Result<()> {
    let name = match part.events.get(idx) {
        Some(XmlEvent::Start { name, .. }) | Some(XmlEvent::Empty { name, .. }) => name.as_str(),
        _ => "",
    };
    if name != expected {
        return Err(Error::Write(format!(
            "{}: expected {expected} at event {idx}, found {name:?}",
            part.name
        )));
    }
    Ok(())
}

fn set_attr_value(ev: &mut XmlEvent, key: &str, value: &str) {
    match ev {
        XmlEvent::Start { attrs, .. } | XmlEvent::Empty { attrs, .. } => {
            for (k, v) in attrs.iter_mut() {
                if k == key {
                    *v = value.to_string();
                    return;
                }
            }
            attrs.push((key.to_string(), value.to_string()));
        }
        _ => {}
    }
}
