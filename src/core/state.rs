use serde::{Deserialize, Serialize};

use crate::core::error::ComicError;

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct WorkflowState {
    pub completed_stories: Vec<String>,
}

/// One reference image belonging to a named character.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CharacterReference {
    pub name: String,
    pub image_bytes: Vec<u8>,
    pub mime_type: String,
}

/// Which reference was attached to a panel request, kept for export.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ReferenceProvenance {
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

impl From<&CharacterReference> for ReferenceProvenance {
    fn from(r: &CharacterReference) -> Self {
        Self {
            name: r.name.clone(),
            mime_type: r.mime_type.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PanelSpec {
    /// 1-based position in the plan.
    pub index: usize,
    pub title: String,
    pub visual_description: String,
    pub dialogue: String,
    pub caption: String,
    pub mentioned_characters: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PanelImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Terminal state of one panel job.
#[derive(Clone, Debug)]
pub struct PanelResult {
    pub spec: PanelSpec,
    pub composed_prompt: String,
    pub used_references: Vec<ReferenceProvenance>,
    pub outcome: Result<PanelImage, ComicError>,
}

impl PanelResult {
    pub fn index(&self) -> usize {
        self.spec.index
    }

    pub fn image(&self) -> Option<&PanelImage> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ComicError> {
        self.outcome.as_ref().err()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}
