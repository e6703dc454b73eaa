use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::error::{ComicError, ComicResult};
use crate::services::llm::LlmConfig;
use crate::services::prompt::StylePreset;

pub const MAX_PARALLEL_LIMIT: usize = 6;

/// Ratios the image service accepts for `imageConfig.aspectRatio`.
pub const SUPPORTED_ASPECT_RATIOS: &[&str] = &[
    "1:1", "2:3", "3:2", "3:4", "4:3", "4:5", "5:4", "9:16", "16:9", "21:9",
];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_input")]
    pub input_folder: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_build")]
    pub build_folder: String,

    #[serde(default)]
    pub unattended: bool,

    pub llm: LlmConfig,

    #[serde(default)]
    pub comic: ComicConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ComicConfig {
    #[serde(default = "default_page_count")]
    pub page_count: usize,
    #[serde(default = "default_language")]
    pub language: String,
    /// `WIDTHxHEIGHT`, e.g. `1024x1536`.
    #[serde(default = "default_aspect")]
    pub aspect: String,
    #[serde(default = "default_style_preset")]
    pub style_preset: String,
    #[serde(default)]
    pub style_notes: String,
    #[serde(default)]
    pub include_balloons: bool,
    #[serde(default = "default_true")]
    pub captions_below: bool,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default)]
    pub image_retries: u32,
    #[serde(default = "default_image_retry_delay")]
    pub image_retry_delay_seconds: u64,
    #[serde(default)]
    pub characters: Vec<CharacterConfig>,
}

impl Default for ComicConfig {
    fn default() -> Self {
        Self {
            page_count: default_page_count(),
            language: default_language(),
            aspect: default_aspect(),
            style_preset: default_style_preset(),
            style_notes: String::new(),
            include_balloons: false,
            captions_below: true,
            seed: None,
            text_model: default_text_model(),
            image_model: default_image_model(),
            max_parallel: default_max_parallel(),
            image_retries: 0,
            image_retry_delay_seconds: default_image_retry_delay(),
            characters: Vec::new(),
        }
    }
}

/// A named character and the reference images that depict it.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CharacterConfig {
    pub name: String,
    #[serde(default)]
    pub images: Vec<String>,
}

fn default_input() -> String {
    "input".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_build() -> String {
    "build".to_string()
}
fn default_page_count() -> usize {
    6
}
fn default_language() -> String {
    "English".to_string()
}
fn default_aspect() -> String {
    "1024x1536".to_string()
}
fn default_style_preset() -> String {
    "comic".to_string()
}
fn default_true() -> bool {
    true
}
fn default_text_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_image_model() -> String {
    "gemini-2.0-flash-preview-image-generation".to_string()
}
fn default_max_parallel() -> usize {
    2
}
fn default_image_retry_delay() -> u64 {
    2
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Path::new("config.yml");
        if !path.exists() {
            anyhow::bail!("config.yml not found. Please create one.");
        }

        let content = fs::read_to_string(path).context("Failed to read config.yml")?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml_ng::from_str(content).context("Failed to parse config.yml")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.input_folder)?;
        fs::create_dir_all(&self.output_folder)?;
        fs::create_dir_all(&self.build_folder)?;
        Ok(())
    }
}

/// Per-panel retry behaviour. The default performs no retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

/// Settings for one generation run. Built once from [`ComicConfig`] and
/// passed by reference to every component; nothing mutates it mid-run.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub page_count: usize,
    pub language: String,
    pub aspect_ratio: (u32, u32),
    pub style_preset: String,
    pub style_notes: String,
    pub render_balloons_in_image: bool,
    pub show_captions_below_image: bool,
    pub seed: Option<i64>,
    pub max_parallel: usize,
    pub text_model_id: String,
    pub image_model_id: String,
    pub retry: RetryPolicy,
}

impl GenerationOptions {
    pub fn from_config(cfg: &ComicConfig) -> ComicResult<Self> {
        if cfg.page_count == 0 {
            return Err(ComicError::config("page_count must be at least 1"));
        }
        let aspect_ratio = parse_aspect(&cfg.aspect)?;
        cfg.style_preset.parse::<StylePreset>()?;

        let max_parallel = cfg.max_parallel.clamp(1, MAX_PARALLEL_LIMIT);
        if max_parallel != cfg.max_parallel {
            warn!(
                "max_parallel {} out of range, using {}",
                cfg.max_parallel, max_parallel
            );
        }

        Ok(Self {
            page_count: cfg.page_count,
            language: cfg.language.clone(),
            aspect_ratio,
            style_preset: cfg.style_preset.clone(),
            style_notes: cfg.style_notes.clone(),
            render_balloons_in_image: cfg.include_balloons,
            show_captions_below_image: cfg.captions_below,
            seed: cfg.seed,
            max_parallel,
            text_model_id: cfg.text_model.clone(),
            image_model_id: cfg.image_model.clone(),
            retry: RetryPolicy {
                max_retries: cfg.image_retries,
                delay: Duration::from_secs(cfg.image_retry_delay_seconds),
            },
        })
    }

    /// Aspect ratio reduced to lowest terms, e.g. `2:3` for 1024x1536.
    pub fn aspect_ratio_label(&self) -> String {
        let (w, h) = self.aspect_ratio;
        ratio_label(w, h)
    }
}

fn ratio_label(w: u32, h: u32) -> String {
    let d = gcd(w, h).max(1);
    format!("{}:{}", w / d, h / d)
}

fn parse_aspect(s: &str) -> ComicResult<(u32, u32)> {
    let invalid = || ComicError::config(format!("invalid aspect '{}', expected WIDTHxHEIGHT", s));
    let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
    let w: u32 = w.trim().parse().map_err(|_| invalid())?;
    let h: u32 = h.trim().parse().map_err(|_| invalid())?;
    if w == 0 || h == 0 {
        return Err(invalid());
    }
    let label = ratio_label(w, h);
    if !SUPPORTED_ASPECT_RATIOS.contains(&label.as_str()) {
        return Err(ComicError::config(format!(
            "aspect '{}' reduces to {}, supported ratios are {}",
            s,
            label,
            SUPPORTED_ASPECT_RATIOS.join(", ")
        )));
    }
    Ok((w, h))
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}
