use anyhow::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::io::Write;

use crate::core::config::GenerationOptions;
use crate::core::state::{PanelResult, ReferenceProvenance};
use crate::utils::image::extension_for_mime;

pub const METADATA_FILE: &str = "panels.json";
pub const CAPTIONS_FILE: &str = "captions.md";

/// One entry of `panels.json`.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct PanelMetadata {
    pub index: usize,
    pub title: String,
    pub caption: String,
    pub prompt: String,
    pub references: Vec<ReferenceProvenance>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleImage {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Exportable result of a run: images of the successful panels plus
/// metadata for every requested panel.
#[derive(Clone, Debug, Default)]
pub struct Bundle {
    pub images: Vec<BundleImage>,
    pub metadata: Vec<PanelMetadata>,
    pub captions: Option<String>,
}

pub fn image_entry_name(index: usize, mime_type: &str) -> String {
    format!("panel_{:02}.{}", index, extension_for_mime(mime_type))
}

pub fn assemble(results: &[PanelResult], options: &GenerationOptions) -> Bundle {
    let mut ordered: Vec<&PanelResult> = results.iter().collect();
    ordered.sort_by_key(|r| r.index());

    let images = ordered
        .iter()
        .filter_map(|r| {
            r.image().map(|img| BundleImage {
                name: image_entry_name(r.index(), &img.mime_type),
                mime_type: img.mime_type.clone(),
                bytes: img.bytes.clone(),
            })
        })
        .collect();

    let metadata = ordered
        .iter()
        .map(|r| PanelMetadata {
            index: r.index(),
            title: r.spec.title.clone(),
            caption: r.spec.caption.clone(),
            prompt: r.composed_prompt.clone(),
            references: r.used_references.clone(),
        })
        .collect();

    let captions = options
        .show_captions_below_image
        .then(|| render_captions(&ordered));

    Bundle {
        images,
        metadata,
        captions,
    }
}

fn render_captions(ordered: &[&PanelResult]) -> String {
    let mut out = String::new();
    for r in ordered {
        out.push_str(&format!("## {}. {}\n\n", r.index(), r.spec.title));
        if !r.spec.caption.is_empty() {
            out.push_str(&format!("{}\n\n", r.spec.caption));
        }
        if !r.spec.dialogue.is_empty() {
            out.push_str(&format!("> {}\n\n", r.spec.dialogue));
        }
    }
    out
}

impl Bundle {
    pub fn metadata_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.metadata)?)
    }

    /// Indices listed in the metadata that have no image entry.
    pub fn missing_panels(&self) -> Vec<usize> {
        self.metadata
            .iter()
            .map(|m| m.index)
            .filter(|i| !self.images.iter().any(|img| img.name.starts_with(&format!("panel_{:02}.", i))))
            .collect()
    }

    pub fn is_partial(&self) -> bool {
        self.images.len() < self.metadata.len()
    }

    /// Writes the bundle as a gzip-compressed tar archive.
    pub fn write_archive<W: Write>(&self, writer: W) -> Result<W> {
        let encoder = GzEncoder::new(writer, Compression::default());
        let mut archive = tar::Builder::new(encoder);

        for image in &self.images {
            append_entry(&mut archive, &image.name, &image.bytes)?;
        }
        append_entry(&mut archive, METADATA_FILE, self.metadata_json()?.as_bytes())?;
        if let Some(captions) = &self.captions {
            append_entry(&mut archive, CAPTIONS_FILE, captions.as_bytes())?;
        }

        let encoder = archive.into_inner()?;
        Ok(encoder.finish()?)
    }

    pub fn to_archive_bytes(&self) -> Result<Vec<u8>> {
        self.write_archive(Vec::new())
    }
}

fn append_entry<W: Write>(archive: &mut tar::Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    archive.append_data(&mut header, name, data)?;
    Ok(())
}
