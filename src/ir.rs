use serde::{Deserialize, Serialize};

/// Box geometry in EMU. The margin math itself is unit-agnostic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    pub margin: i64,
    pub margin_left: Option<i64>,
    pub margin_right: Option<i64>,
}

/// Locates a text run's XML nodes inside a parsed slide part.
///
/// Indices address the part's event stream from the parse of the same
/// package bytes; they stay valid because rewriting never adds or removes
/// events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextNodeRef {
    pub part_name: String,
    /// `a:t` start event.
    pub elem_event_index: usize,
    /// Text event holding the run content.
    pub text_event_index: usize,
    /// The run's `a:rPr`, when present.
    pub rpr_event_index: Option<usize>,
    /// The enclosing body's `a:bodyPr`, when present.
    pub body_pr_event_index: Option<usize>,
}

/// One text run on a slide, with the geometry of its enclosing shape.
#[derive(Clone, Debug)]
pub struct TextElement {
    pub text: String,
    pub position: Position,
    /// Run font size in hundredths of a point, when set directly on the run.
    pub font_sz: Option<u32>,
    pub node: TextNodeRef,
}

#[derive(Clone, Debug)]
pub struct Slide {
    pub part_name: String,
    pub elements: Vec<TextElement>,
}

#[derive(Clone, Debug)]
pub struct Presentation {
    pub slides: Vec<Slide>,
}

impl Presentation {
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.slides.iter().map(|s| s.elements.len()).sum()
    }
}

/// Addressable unit of text submitted to the translation gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranslationFragment {
    pub fragment_id: usize,
    pub source_text: String,
    pub source_lang: String,
    pub target_lang: String,
}

/// Patch for one text run, applied by the writer. Absolute values only, so
/// re-applying the same update set is idempotent.
#[derive(Clone, Debug)]
pub struct ElementUpdate {
    pub node: TextNodeRef,
    pub text: Option<String>,
    /// New `lIns`/`rIns` in EMU for the enclosing `a:bodyPr`.
    pub insets: Option<(i64, i64)>,
    /// New run font size in hundredths of a point.
    pub font_sz: Option<u32>,
}

impl ElementUpdate {
    #[must_use]
    pub fn for_node(node: TextNodeRef) -> Self {
        Self {
            node,
            text: None,
            insets: None,
            font_sz: None,
        }
    }
}
