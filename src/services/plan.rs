use serde::Deserialize;
use serde_json::Value;

use crate::core::config::GenerationOptions;
use crate::core::error::{ComicError, ComicResult};
use crate::core::state::PanelSpec;
use crate::services::characters::names_match;

#[derive(Deserialize)]
struct PlanDocument {
    panels: Vec<Value>,
}

/// Returns the slice between the first `{` and the last `}` of `s`.
pub fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}

/// Turns a text-generation response into at most `options.page_count`
/// panel specs, indexed from 1.
pub fn parse_plan(raw: &str, options: &GenerationOptions) -> ComicResult<Vec<PanelSpec>> {
    let json = extract_json_object(raw)
        .ok_or_else(|| ComicError::plan_format("no JSON object found in plan response"))?;

    let doc: PlanDocument = serde_json::from_str(json)
        .map_err(|e| ComicError::plan_format(format!("plan is not a panels document: {}", e)))?;

    Ok(doc
        .panels
        .iter()
        .take(options.page_count)
        .enumerate()
        .map(|(i, p)| panel_from_value(i + 1, p))
        .collect())
}

fn panel_from_value(index: usize, value: &Value) -> PanelSpec {
    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };

    let title = text("title");
    PanelSpec {
        index,
        title: if title.is_empty() {
            format!("Panel {}", index)
        } else {
            title
        },
        visual_description: text("visual_summary"),
        dialogue: text("dialogue"),
        caption: text("caption"),
        mentioned_characters: characters_from_value(value.get("characters")),
    }
}

/// Names from a `characters` array; entries may be `{ "name": .. }` objects
/// or bare strings. Duplicates are dropped case-insensitively, keeping the
/// first spelling.
fn characters_from_value(value: Option<&Value>) -> Vec<String> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut names: Vec<String> = Vec::new();
    for item in items {
        let name = match item {
            Value::String(s) => s.as_str(),
            Value::Object(obj) => obj.get("name").and_then(Value::as_str).unwrap_or_default(),
            _ => "",
        }
        .trim();

        if !name.is_empty() && !names.iter().any(|n| names_match(n, name)) {
            names.push(name.to_string());
        }
    }
    names
}

/// System instruction asking the text service for a panel plan.
pub fn planning_prompt(options: &GenerationOptions, known_characters: &[String]) -> String {
    let mut prompt = format!(
        "You are a senior comic art director. Split the user's story into exactly {} concise panels.\n\
        Return strict JSON with this schema:\n\
        {{\n  \"panels\": [\n    {{\n      \"title\": string,\n      \"visual_summary\": string,\n      \
        \"dialogue\": string, // empty if none\n      \"caption\": string,  // concise narration for below-image text\n      \
        \"characters\": [ {{ \"name\": string, \"age\": string, \"gender\": string, \"key_traits\": string }} ]\n    }}\n  ]\n}}\n\
        Guidelines: keep character names consistent; mention settings, camera angles, and key actions in visual_summary; \
        dialogue only if needed; language: {}; visual style: {} {}; speech balloons in image: {} but keep dialogue text short.",
        options.page_count,
        options.language,
        options.style_preset,
        options.style_notes.trim(),
        if options.render_balloons_in_image { "yes" } else { "no" },
    );

    if !known_characters.is_empty() {
        prompt.push_str(&format!(
            "\nKnown characters with reference images: {}. Use these exact names in \"characters\" whenever they appear in a panel.",
            known_characters.join(", ")
        ));
    }
    prompt
}

pub fn story_prompt(story: &str) -> String {
    format!("STORY:\n{}", story.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ComicConfig;

    fn options(page_count: usize) -> GenerationOptions {
        GenerationOptions::from_config(&ComicConfig {
            page_count,
            ..Default::default()
        })
        .unwrap()
    }

    const PLAN: &str = r#"{
        "panels": [
            { "title": "Arrival", "visual_summary": "A train in fog", "dialogue": "", "caption": "Night.",
              "characters": [ { "name": "Mira", "age": "30" } ] },
            { "visual_summary": "Platform", "dialogue": "Hello?", "caption": "She calls out.",
              "characters": [ { "name": "Mira" }, { "name": "mira" }, "Otto" ] },
            { "title": "  ", "visual_summary": "Empty station", "characters": "nobody" },
            { "title": "Extra", "visual_summary": "Unused" }
        ]
    }"#;

    #[test]
    fn test_parse_truncates_to_page_count() {
        let panels = parse_plan(PLAN, &options(3)).unwrap();
        assert_eq!(panels.len(), 3);
        let indices: Vec<usize> = panels.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn test_parse_returns_all_when_fewer_provided() {
        let panels = parse_plan(PLAN, &options(10)).unwrap();
        assert_eq!(panels.len(), 4);
        assert_eq!(panels[3].index, 4);
    }

    #[test]
    fn test_parse_defaults() {
        let panels = parse_plan(PLAN, &options(3)).unwrap();
        assert_eq!(panels[0].title, "Arrival");
        assert_eq!(panels[0].mentioned_characters, vec!["Mira"]);

        assert_eq!(panels[1].title, "Panel 2");
        assert_eq!(panels[1].dialogue, "Hello?");
        assert_eq!(panels[1].mentioned_characters, vec!["Mira", "Otto"]);

        assert_eq!(panels[2].title, "Panel 3");
        assert_eq!(panels[2].dialogue, "");
        assert_eq!(panels[2].caption, "");
        assert!(panels[2].mentioned_characters.is_empty());
    }

    #[test]
    fn test_parse_tolerates_wrapping_prose() {
        let raw = format!("Sure! Here is your plan:\n```json\n{}\n```\nEnjoy.", PLAN);
        let panels = parse_plan(&raw, &options(2)).unwrap();
        assert_eq!(panels.len(), 2);
    }

    #[test]
    fn test_parse_without_object_is_plan_format_error() {
        for raw in ["", "no json here", "} backwards {", "[1, 2, 3]"] {
            assert!(
                matches!(parse_plan(raw, &options(3)), Err(ComicError::PlanFormat(_))),
                "expected PlanFormat for {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_parse_missing_panels_is_plan_format_error() {
        assert!(matches!(
            parse_plan(r#"{"scenes": []}"#, &options(3)),
            Err(ComicError::PlanFormat(_))
        ));
        assert!(matches!(
            parse_plan(r#"{"panels": "three"}"#, &options(3)),
            Err(ComicError::PlanFormat(_))
        ));
        assert!(matches!(
            parse_plan(r#"{"panels": [ {"title": "a"} "#, &options(3)),
            Err(ComicError::PlanFormat(_))
        ));
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(extract_json_object("x {\"a\":1} y"), Some("{\"a\":1}"));
        assert_eq!(extract_json_object("{ {} }"), Some("{ {} }"));
        assert_eq!(extract_json_object("none"), None);
    }

    #[test]
    fn test_planning_prompt_mentions_settings_and_characters() {
        let opts = options(4);
        let prompt = planning_prompt(&opts, &["Mira".to_string(), "Otto".to_string()]);
        assert!(prompt.contains("exactly 4 concise panels"));
        assert!(prompt.contains("language: English"));
        assert!(prompt.contains("visual style: comic"));
        assert!(prompt.contains("Mira, Otto"));

        let bare = planning_prompt(&opts, &[]);
        assert!(!bare.contains("Known characters"));
    }

    #[test]
    fn test_story_prompt() {
        assert_eq!(story_prompt("  A cat.  "), "STORY:\nA cat.");
    }
}
