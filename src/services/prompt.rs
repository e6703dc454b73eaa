use std::fmt;
use std::str::FromStr;

use crate::core::config::GenerationOptions;
use crate::core::error::{ComicError, ComicResult};
use crate::core::state::PanelSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StylePreset {
    Photorealism,
    Comic,
    Manga,
    Anime,
    Watercolor,
    Pixel,
    ThreeD,
}

impl StylePreset {
    pub const ALL: [StylePreset; 7] = [
        StylePreset::Photorealism,
        StylePreset::Comic,
        StylePreset::Manga,
        StylePreset::Anime,
        StylePreset::Watercolor,
        StylePreset::Pixel,
        StylePreset::ThreeD,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StylePreset::Photorealism => "photorealism",
            StylePreset::Comic => "comic",
            StylePreset::Manga => "manga",
            StylePreset::Anime => "anime",
            StylePreset::Watercolor => "watercolor",
            StylePreset::Pixel => "pixel",
            StylePreset::ThreeD => "3d",
        }
    }

    /// Opening sentence of every panel prompt rendered in this style.
    pub fn descriptor(&self) -> &'static str {
        match self {
            StylePreset::Photorealism => {
                "A photorealistic comic panel: high dynamic range, cinematic lighting, sharp details, consistent lens and color grading."
            }
            StylePreset::Comic => {
                "A western comic book panel: bold inks, halftone shading, flat colors, dynamic composition."
            }
            StylePreset::Manga => {
                "A manga panel: screentone textures, black and white ink, expressive linework."
            }
            StylePreset::Anime => {
                "An anime style panel: clean lineart, cel shading, vibrant colors, cinematic framing."
            }
            StylePreset::Watercolor => {
                "A watercolor comic panel: soft washes, soft edges, painterly textures."
            }
            StylePreset::Pixel => {
                "A pixel art comic panel: crisp pixel edges, limited retro palette."
            }
            StylePreset::ThreeD => {
                "A 3D rendered comic panel: physically based materials, realistic lighting, raytraced reflections."
            }
        }
    }
}

impl fmt::Display for StylePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StylePreset {
    type Err = ComicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace(['_', ' '], "");
        StylePreset::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = StylePreset::ALL.iter().map(|p| p.as_str()).collect();
                ComicError::config(format!(
                    "unknown style preset '{}', expected one of: {}",
                    s,
                    known.join(", ")
                ))
            })
    }
}

const NO_TEXT_CLAUSE: &str = "Do not render any text, letters or speech balloons inside the image.";
const DETAIL_CLAUSE: &str = "High resolution, highly detailed.";
const CONSISTENCY_CLAUSE: &str =
    "Keep lighting, color palette and character appearance consistent across panels.";

/// Builds the final rendering instruction for one panel.
///
/// Deterministic for identical inputs. Fails only when the style preset
/// cannot be resolved.
pub fn compose_prompt(panel: &PanelSpec, options: &GenerationOptions) -> ComicResult<String> {
    let preset: StylePreset = options.style_preset.parse()?;

    let dialogue = panel.dialogue.trim();
    let text_clause = if options.render_balloons_in_image && !dialogue.is_empty() {
        format!(
            "Draw clear, legible speech balloons containing exactly this dialogue: {}",
            dialogue
        )
    } else {
        NO_TEXT_CLAUSE.to_string()
    };

    let clauses = [
        preset.descriptor(),
        options.style_notes.trim(),
        panel.visual_description.trim(),
        text_clause.as_str(),
        DETAIL_CLAUSE,
        CONSISTENCY_CLAUSE,
    ];

    Ok(clauses
        .iter()
        .filter(|c| !c.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ComicConfig;

    fn options(style: &str, balloons: bool, notes: &str) -> GenerationOptions {
        let mut options = GenerationOptions::from_config(&ComicConfig::default()).unwrap();
        options.style_preset = style.to_string();
        options.render_balloons_in_image = balloons;
        options.style_notes = notes.to_string();
        options
    }

    fn panel(dialogue: &str) -> PanelSpec {
        PanelSpec {
            index: 1,
            title: "Arrival".to_string(),
            visual_description: "Mira steps off the train into fog.".to_string(),
            dialogue: dialogue.to_string(),
            caption: "She was late.".to_string(),
            mentioned_characters: vec!["Mira".to_string()],
        }
    }

    #[test]
    fn test_style_preset_parsing() {
        assert_eq!("manga".parse::<StylePreset>().unwrap(), StylePreset::Manga);
        assert_eq!("3D".parse::<StylePreset>().unwrap(), StylePreset::ThreeD);
        assert_eq!(" Photorealism ".parse::<StylePreset>().unwrap(), StylePreset::Photorealism);
        assert!(matches!("oil".parse::<StylePreset>(), Err(ComicError::Config(_))));
        for preset in StylePreset::ALL {
            assert_eq!(preset.to_string().parse::<StylePreset>().unwrap(), preset);
        }
    }

    #[test]
    fn test_clause_order() {
        let prompt = compose_prompt(&panel(""), &options("watercolor", false, "muted tones")).unwrap();
        let style = prompt.find(StylePreset::Watercolor.descriptor()).unwrap();
        let notes = prompt.find("muted tones").unwrap();
        let visual = prompt.find("Mira steps off the train").unwrap();
        let no_text = prompt.find(NO_TEXT_CLAUSE).unwrap();
        let detail = prompt.find(DETAIL_CLAUSE).unwrap();
        let consistency = prompt.find(CONSISTENCY_CLAUSE).unwrap();
        assert!(style < notes && notes < visual && visual < no_text);
        assert!(no_text < detail && detail < consistency);
        assert!(prompt.ends_with(CONSISTENCY_CLAUSE));
    }

    #[test]
    fn test_empty_notes_are_skipped() {
        let prompt = compose_prompt(&panel(""), &options("comic", false, "   ")).unwrap();
        assert!(!prompt.contains("  "));
    }

    #[test]
    fn test_deterministic() {
        let opts = options("anime", true, "rain");
        let a = compose_prompt(&panel("Wait for me!"), &opts).unwrap();
        let b = compose_prompt(&panel("Wait for me!"), &opts).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_dialogue_only_with_balloons() {
        let with = compose_prompt(&panel("Wait for me!"), &options("comic", true, "")).unwrap();
        assert!(with.contains("Wait for me!"));
        assert!(!with.contains(NO_TEXT_CLAUSE));

        let without = compose_prompt(&panel("Wait for me!"), &options("comic", false, "")).unwrap();
        assert!(!without.contains("Wait for me!"));
        assert!(without.contains(NO_TEXT_CLAUSE));
    }

    #[test]
    fn test_balloons_with_empty_dialogue_render_no_text() {
        let prompt = compose_prompt(&panel(""), &options("comic", true, "")).unwrap();
        assert!(prompt.contains(NO_TEXT_CLAUSE));
        assert!(!prompt.contains("speech balloons containing"));
    }

    #[test]
    fn test_unknown_style_is_config_error() {
        let result = compose_prompt(&panel(""), &options("cubism", false, ""));
        assert!(matches!(result, Err(ComicError::Config(_))));
    }
}
