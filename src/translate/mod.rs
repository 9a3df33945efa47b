//! Batched fragment translation over an LLM backend.
//!
//! Fragments are packed into char-budgeted batches, wrapped in `<<TX_SEG>>`
//! markers and sent as one prompt. Replies are parsed back by marker; a
//! batch whose reply cannot be parsed is split in half and requeued, down
//! to single fragments, where the reply is salvaged between markers. A
//! fragment whose final candidate still fails validation is absent from the
//! result map; callers fall back to its source text and report it.

pub mod backend;
pub mod prompts;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::{
    WorkerSection, DEFAULT_MAX_CHARS_PER_BATCH, DEFAULT_MAX_ITEMS_PER_BATCH, DEFAULT_MAX_RETRIES,
};
use crate::error::{Error, Result};
use crate::ir::TranslationFragment;

use backend::{BackendError, TranslationBackend};
use prompts::{lang_label, render_template};

pub const SEG_ID_WIDTH: usize = 6;

/// Char overhead per fragment for markers and prompt framing.
const FRAGMENT_OVERHEAD: usize = 96;

pub fn seg_start(fragment_id: usize) -> String {
    format!("<<TX_SEG:{fragment_id:0SEG_ID_WIDTH$}>>")
}

pub fn seg_end(fragment_id: usize) -> String {
    format!("<<TX_END:{fragment_id:0SEG_ID_WIDTH$}>>")
}

// Anything that looks like one of our markers. Used to catch hallucinated
// tokens in model output, so it is deliberately broader than the two real
// marker forms.
static ANY_TX_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<<TX_[A-Za-z0-9_:\-]{1,64}>>").expect("tx token regex"));

static DIGIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("digit regex"));

static LETTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{L}").expect("letter regex"));

/// Text with no letters in any script (numbers, bullets, punctuation) is
/// passed through untranslated.
pub fn is_trivial_text(text: &str) -> bool {
    !LETTER_RE.is_match(text)
}

pub fn parse_segmented_output(
    text: &str,
    expected_ids: &[usize],
) -> Result<HashMap<usize, String>> {
    let mut segments: HashMap<usize, String> = HashMap::new();
    let mut cursor = 0usize;
    for &fragment_id in expected_ids {
        let start_marker = seg_start(fragment_id);
        let end_marker = seg_end(fragment_id);

        let start_idx = text[cursor..]
            .find(&start_marker)
            .map(|i| cursor + i)
            .ok_or_else(|| {
                Error::Translation(format!("missing segment start for id={fragment_id}"))
            })?;
        let start_end = start_idx + start_marker.len();

        let end_idx = text[start_end..]
            .find(&end_marker)
            .map(|i| start_end + i)
            .ok_or_else(|| {
                Error::Translation(format!("missing segment end for id={fragment_id}"))
            })?;

        segments.insert(fragment_id, text[start_end..end_idx].to_string());
        cursor = end_idx + end_marker.len();
    }
    Ok(segments)
}

/// Rejects model output that would corrupt the deck: empty text,
/// hallucinated marker tokens, or a changed digit multiset.
pub fn validate_translation(source: &str, translated: &str) -> Result<()> {
    if translated.trim().is_empty() {
        return Err(Error::Translation("empty_output".to_string()));
    }

    for m in ANY_TX_TOKEN_RE.find_iter(translated) {
        let tok = m.as_str();
        if !source.contains(tok) {
            return Err(Error::Translation(format!("unexpected_tx_token:{tok}")));
        }
    }

    let src_plain = ANY_TX_TOKEN_RE.replace_all(source, " ");
    let tgt_plain = ANY_TX_TOKEN_RE.replace_all(translated, " ");
    let src_digits = digit_counter(&src_plain);
    let tgt_digits = digit_counter(&tgt_plain);
    if src_digits != tgt_digits {
        return Err(Error::Translation(format!(
            "digits_mismatch src={src_digits:?} tgt={tgt_digits:?}"
        )));
    }

    Ok(())
}

fn digit_counter(text: &str) -> HashMap<String, usize> {
    let mut out: HashMap<String, usize> = HashMap::new();
    for m in DIGIT_RE.find_iter(text) {
        *out.entry(m.as_str().to_string()).or_insert(0) += 1;
    }
    out
}

fn cleanup_model_text(text: &str) -> String {
    let mut s = text.trim().to_string();
    if s.starts_with("```") {
        if let Some(i) = s.find('\n') {
            s = s[i + 1..].to_string();
        }
        if let Some(end) = s.rfind("```") {
            s = s[..end].to_string();
        }
    }
    s.trim().trim_matches('"').trim().to_string()
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub max_chars: usize,
    pub max_items: usize,
    pub max_retries: usize,
    pub retry_min_delay_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS_PER_BATCH,
            max_items: DEFAULT_MAX_ITEMS_PER_BATCH,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_min_delay_ms: 200,
        }
    }
}

impl GatewayConfig {
    pub fn from_worker(ws: &WorkerSection) -> Self {
        Self {
            max_chars: ws.max_chars_per_batch(),
            max_items: ws.max_items_per_batch(),
            max_retries: ws.max_retries(),
            ..Self::default()
        }
    }
}

pub struct TranslationGateway {
    backend: Arc<dyn TranslationBackend>,
    prompt_tmpl: String,
    cfg: GatewayConfig,
}

impl TranslationGateway {
    pub fn new(
        backend: Arc<dyn TranslationBackend>,
        prompt_tmpl: String,
        cfg: GatewayConfig,
    ) -> Self {
        Self {
            backend,
            prompt_tmpl,
            cfg,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Translates the fragments, returning a text per fragment id. Trivial
    /// fragments pass through as-is; a fragment whose output is still
    /// rejected after batch splitting is absent from the map, and the caller
    /// keeps its source text. Only a backend failure that survives retries
    /// fails the whole call.
    pub async fn translate_fragments(
        &self,
        fragments: &[TranslationFragment],
    ) -> Result<HashMap<usize, String>> {
        let mut out: HashMap<usize, String> = HashMap::new();

        let mut pending: Vec<usize> = Vec::new();
        for (i, f) in fragments.iter().enumerate() {
            if f.source_text.trim().is_empty() || is_trivial_text(&f.source_text) {
                out.insert(f.fragment_id, f.source_text.clone());
            } else {
                pending.push(i);
            }
        }
        if pending.is_empty() {
            return Ok(out);
        }

        let mut queue: VecDeque<Vec<usize>> = VecDeque::new();
        let mut cur: Vec<usize> = Vec::new();
        let mut used = 0usize;
        for &i in &pending {
            let add = fragments[i].source_text.len() + FRAGMENT_OVERHEAD;
            if !cur.is_empty() && (used + add > self.cfg.max_chars || cur.len() >= self.cfg.max_items)
            {
                queue.push_back(std::mem::take(&mut cur));
                used = 0;
            }
            used += add;
            cur.push(i);
        }
        if !cur.is_empty() {
            queue.push_back(cur);
        }

        // Worklist with split-on-parse-failure, down to single fragments.
        while let Some(batch) = queue.pop_front() {
            let ids: Vec<usize> = batch.iter().map(|&i| fragments[i].fragment_id).collect();
            let block = build_fragment_block(fragments, &batch);
            let first = &fragments[batch[0]];
            let prompt = render_template(
                &self.prompt_tmpl,
                &[
                    ("source_lang", &lang_label(&first.source_lang)),
                    ("target_lang", &lang_label(&first.target_lang)),
                    ("fragment_block", &block),
                ],
            );

            debug!(
                fragments = batch.len(),
                chars = block.len(),
                backend = self.backend.name(),
                "translate batch"
            );
            let raw = self
                .complete_with_retry(&prompt)
                .await
                .map_err(|e| Error::Translation(e.to_string()))?;
            let cleaned = cleanup_model_text(&raw);

            match parse_segmented_output(&cleaned, &ids) {
                Ok(segs) => {
                    for &i in &batch {
                        let f = &fragments[i];
                        let candidate = segs
                            .get(&f.fragment_id)
                            .map(|s| cleanup_model_text(s))
                            .unwrap_or_default();
                        resolve_fragment(&mut out, f, &candidate);
                    }
                }
                Err(err) if batch.len() > 1 => {
                    warn!(fragments = batch.len(), %err, "batch reply unparseable; splitting");
                    let mid = batch.len() / 2;
                    queue.push_front(batch[mid..].to_vec());
                    queue.push_front(batch[..mid].to_vec());
                }
                Err(err) => {
                    // Single fragment: take whatever sits between its
                    // markers, or the whole reply when markers are gone.
                    let f = &fragments[batch[0]];
                    let mut s = cleaned;
                    let sm = seg_start(f.fragment_id);
                    let em = seg_end(f.fragment_id);
                    if let Some(i) = s.find(&sm) {
                        s = s[i + sm.len()..].to_string();
                    }
                    if let Some(i) = s.find(&em) {
                        s = s[..i].to_string();
                    }
                    let salvaged = cleanup_model_text(&s);
                    warn!(fragment_id = f.fragment_id, %err, "salvaging unmarked reply");
                    resolve_fragment(&mut out, f, &salvaged);
                }
            }
        }

        Ok(out)
    }

    async fn complete_with_retry(
        &self,
        prompt: &str,
    ) -> std::result::Result<String, BackendError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.cfg.retry_min_delay_ms))
            .with_max_times(self.cfg.max_retries);
        (|| async { self.backend.complete(prompt).await })
            .retry(&backoff)
            .when(|e: &BackendError| e.transient)
            .await
    }
}

fn build_fragment_block(fragments: &[TranslationFragment], batch: &[usize]) -> String {
    let mut block = String::new();
    for &i in batch {
        let f = &fragments[i];
        block.push_str(&seg_start(f.fragment_id));
        block.push('\n');
        block.push_str(&f.source_text);
        block.push('\n');
        block.push_str(&seg_end(f.fragment_id));
        block.push_str("\n\n");
    }
    block
}

// Inserts a validated candidate; a rejected one stays out of the map so the
// caller sees the fragment as failed.
fn resolve_fragment(
    out: &mut HashMap<usize, String>,
    fragment: &TranslationFragment,
    candidate: &str,
) {
    match validate_translation(&fragment.source_text, candidate) {
        Ok(()) => {
            out.insert(fragment.fragment_id, candidate.to_string());
        }
        Err(err) => {
            warn!(
                fragment_id = fragment.fragment_id,
                %err,
                "translation rejected"
            );
        }
    }
}
