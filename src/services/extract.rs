use log::{debug, warn};

use crate::core::error::{ComicError, ComicResult};
use crate::core::state::PanelImage;
use crate::services::image::{ImageClient, ImageResponse, ResponsePart};
use crate::utils::image::DEFAULT_IMAGE_MIME;

/// Pulls the first usable image out of a generation response.
///
/// Inline image parts are used directly. File references are downloaded via
/// `fetcher`; a failed download moves on to the next part instead of failing
/// the panel. If nothing usable turns up and a download failed, the last
/// download error is returned so a retry policy can act on it.
pub async fn extract_image(
    response: &ImageResponse,
    fetcher: &dyn ImageClient,
) -> ComicResult<PanelImage> {
    let mut last_fetch_error = None;

    for part in &response.parts {
        match part {
            ResponsePart::InlineImage { mime_type, data } if !data.is_empty() => {
                return Ok(PanelImage {
                    bytes: data.clone(),
                    mime_type: mime_type.clone(),
                });
            }
            ResponsePart::FileRef { uri, mime_type } => match fetcher.fetch_file(uri).await {
                Ok(file) if !file.bytes.is_empty() => {
                    let mime_type = file
                        .content_type
                        .or_else(|| mime_type.clone())
                        .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
                    return Ok(PanelImage {
                        bytes: file.bytes,
                        mime_type,
                    });
                }
                Ok(_) => {
                    warn!("File reference {} returned an empty body", uri);
                    last_fetch_error = Some(ComicError::no_image(format!("{} was empty", uri)));
                }
                Err(e) => {
                    warn!("Could not fetch {}: {}", uri, e);
                    last_fetch_error = Some(e);
                }
            },
            ResponsePart::Text(text) => debug!("Ignoring text part: {}", text),
            ResponsePart::InlineImage { .. } => debug!("Ignoring empty inline part"),
        }
    }

    let reason = match &response.finish_reason {
        Some(reason) => format!("finish reason {}", reason),
        None => "response contained no image parts".to_string(),
    };
    match last_fetch_error {
        // Only unreachable file references stood between us and an image.
        Some(ComicError::Fetch(msg)) => Err(ComicError::fetch(format!("{}; {}", msg, reason))),
        Some(e) => Err(ComicError::no_image(format!("{}; last {}", reason, e))),
        None => Err(ComicError::no_image(reason)),
    }
}
