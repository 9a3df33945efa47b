//! Geometry re-fitting for translated text boxes.

use crate::error::{Error, Result};
use crate::ir::TextElement;
use crate::metrics::{estimate_length_ratio, is_rtl_lang};

/// Fraction of the original inset kept when the estimator reports that the
/// translated text occupies a different width. Halving the margin frees room
/// on both sides while keeping the box visually anchored.
pub const BASE_MARGIN_RATE: f64 = 0.5;

/// Share of the combined inset pushed to the reading-start side when the
/// target is right-to-left. The remainder stays on the left.
const RTL_RIGHT_SHARE: f64 = 0.9;

/// Scaling factor clamp. Outside this range the estimate says more about
/// degenerate input than about layout.
const MIN_SCALING: f64 = 0.5;
const MAX_SCALING: f64 = 2.0;

/// Expansion above this triggers font downsizing in the writer.
pub const FONT_AUTOFIT_THRESHOLD: f64 = 1.05;

/// Floor for downsized runs, hundredths of a point (6 pt).
pub const MIN_FONT_SZ: u32 = 600;

/// Advisory factor for the translated text relative to the source box:
/// `< 1.0` when the target is expected to be narrower, `> 1.0` when wider.
#[must_use]
pub fn text_scaling_factor(
    source_text: &str,
    target_text: &str,
    source_lang: &str,
    target_lang: &str,
) -> f64 {
    estimate_length_ratio(source_text, target_text, source_lang, target_lang)
        .clamp(MIN_SCALING, MAX_SCALING)
}

/// Re-fits one element's margins for the language pair.
///
/// Symmetric margins shrink by [`BASE_MARGIN_RATE`] when the estimated
/// width ratio moves off 1.0. A left-to-right to right-to-left pair instead
/// switches to asymmetric margins weighted toward the right inset. Geometry
/// with negative extents is rejected; identical text is a no-op.
pub fn adjust_text_element(
    element: &TextElement,
    source_text: &str,
    target_text: &str,
    source_lang: &str,
    target_lang: &str,
) -> Result<TextElement> {
    let pos = element.position;
    if pos.width < 0 || pos.height < 0 {
        return Err(Error::validation(format!(
            "negative extent: width={} height={}",
            pos.width, pos.height
        )));
    }

    let ratio = estimate_length_ratio(source_text, target_text, source_lang, target_lang);
    let mut adjusted = element.clone();

    if is_rtl_lang(target_lang) && !is_rtl_lang(source_lang) {
        let margin = pos.margin as f64;
        let right = (margin * RTL_RIGHT_SHARE).round() as i64;
        let left = (margin * (1.0 - RTL_RIGHT_SHARE)).round() as i64;
        adjusted.position.margin_left = Some(left);
        adjusted.position.margin_right = Some(right);
    } else if (ratio - 1.0).abs() > f64::EPSILON {
        adjusted.position.margin = (pos.margin as f64 * BASE_MARGIN_RATE).round() as i64;
        adjusted.position.margin_left = None;
        adjusted.position.margin_right = None;
    }

    Ok(adjusted)
}

/// New run size for an expanding pair, `None` when the factor does not call
/// for downsizing.
#[must_use]
pub fn autofit_font_sz(sz: u32, scaling_factor: f64) -> Option<u32> {
    if scaling_factor <= FONT_AUTOFIT_THRESHOLD {
        return None;
    }
    let scaled = (sz as f64 / scaling_factor).round() as u32;
    Some(scaled.max(MIN_FONT_SZ))
}
