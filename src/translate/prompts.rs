use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::error::{Error, Result};

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";
pub const DEFAULT_TRANSLATE: &str = "translate.txt";

/// Prompt templates, read from disk next to the config file when present,
/// otherwise the compiled-in defaults.
#[derive(Clone, Debug)]
pub struct PromptSet {
    pub translate: String,
}

impl PromptSet {
    pub fn load(config_path: Option<&Path>, cfg: &AppConfig) -> Result<Self> {
        let config_dir = config_path
            .and_then(|p| p.parent())
            .unwrap_or_else(|| Path::new("."));

        let translate = match cfg.prompts.translate.as_deref() {
            Some(configured) => {
                let mut p = PathBuf::from(configured);
                if p.is_relative() {
                    p = config_dir.join(&p);
                }
                if !p.exists() {
                    return Err(Error::validation(format!(
                        "prompt file not found: {} (run: reslide --init-config)",
                        p.display()
                    )));
                }
                std::fs::read_to_string(&p)?
            }
            None => {
                let p = config_dir.join(DEFAULT_PROMPTS_DIR).join(DEFAULT_TRANSLATE);
                if !p.exists() {
                    return Ok(Self::builtin());
                }
                std::fs::read_to_string(&p)?
            }
        };

        Ok(Self { translate })
    }

    pub fn builtin() -> Self {
        Self {
            translate: DEFAULT_TRANSLATE_TEXT.to_string(),
        }
    }
}

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

/// Human-readable language name for prompts; falls back to the raw code.
pub fn lang_label(code: &str) -> String {
    let norm = code.trim().to_ascii_lowercase();
    let base = norm.split(['-', '_']).next().unwrap_or(norm.as_str());
    let label = match base {
        "en" => "English",
        "zh" => "Chinese",
        "ja" => "Japanese",
        "ko" => "Korean",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        "pt" => "Portuguese",
        "it" => "Italian",
        "ru" => "Russian",
        "ar" => "Arabic",
        "he" => "Hebrew",
        "fa" => "Persian",
        "ur" => "Urdu",
        "th" => "Thai",
        "vi" => "Vietnamese",
        _ => return code.trim().to_string(),
    };
    label.to_string()
}

pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    vec![(DEFAULT_TRANSLATE, DEFAULT_TRANSLATE_TEXT)]
}

pub const DEFAULT_TRANSLATE_TEXT: &str = r#"Translate from {{source_lang}} to {{target_lang}}.

Rules:
- Do NOT omit content; do NOT summarize.
- Do NOT use ellipsis placeholders like … or ... to skip content.
- Keep ALL tokens like <<TX_...>> unchanged.
- Preserve all digits (0-9) exactly.
- Output ONLY the translated segments, in the same order.
- For each fragment id, output EXACTLY:
  <<TX_SEG:000123>>
  ...translation...
  <<TX_END:000123>>
- Do NOT add any other text.

INPUT:
{{fragment_block}}"#;
