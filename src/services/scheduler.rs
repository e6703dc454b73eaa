use futures_util::StreamExt;
use log::{debug, info, warn};

use crate::core::config::{GenerationOptions, RetryPolicy, MAX_PARALLEL_LIMIT};
use crate::core::error::ComicResult;
use crate::core::state::{CharacterReference, PanelImage, PanelResult, PanelSpec};
use crate::services::characters::{provenance, resolve_references, CharacterStore};
use crate::services::extract::extract_image;
use crate::services::image::{GenerationParams, ImageClient, ImageRequest, RequestPart};
use crate::services::prompt::compose_prompt;

/// Everything one panel job needs, resolved before dispatch.
#[derive(Debug, Clone)]
pub struct PanelJob {
    pub spec: PanelSpec,
    pub prompt: String,
    pub references: Vec<CharacterReference>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// Composes prompts and resolves references for every panel. A
/// configuration error here aborts the run before anything is dispatched.
pub fn prepare_jobs(
    panels: &[PanelSpec],
    options: &GenerationOptions,
    store: &CharacterStore,
) -> ComicResult<Vec<PanelJob>> {
    panels
        .iter()
        .map(|spec| {
            Ok(PanelJob {
                prompt: compose_prompt(spec, options)?,
                references: resolve_references(&spec.mentioned_characters, store),
                spec: spec.clone(),
            })
        })
        .collect()
}

pub fn build_request(job: &PanelJob, options: &GenerationOptions) -> ImageRequest {
    let mut parts: Vec<RequestPart> = job
        .references
        .iter()
        .map(|r| RequestPart::InlineImage {
            mime_type: r.mime_type.clone(),
            data: r.image_bytes.clone(),
        })
        .collect();
    parts.push(RequestPart::Text(job.prompt.clone()));

    ImageRequest {
        model: options.image_model_id.clone(),
        parts,
        params: GenerationParams::with_seed(options.seed),
        aspect_ratio: Some(options.aspect_ratio_label()),
    }
}

/// Runs one image job per panel with at most `options.max_parallel` in
/// flight. A freed slot is refilled with the next panel in index order as
/// soon as any job settles; `on_progress` is called after each one.
///
/// Never fails: a panel's error is logged and kept on its result. The
/// returned results are sorted by panel index.
pub async fn dispatch<F>(
    jobs: Vec<PanelJob>,
    options: &GenerationOptions,
    client: &dyn ImageClient,
    mut on_progress: F,
) -> Vec<PanelResult>
where
    F: FnMut(Progress),
{
    let total = jobs.len();
    let max_parallel = options.max_parallel.clamp(1, MAX_PARALLEL_LIMIT);
    info!("Dispatching {} panel(s), max {} in flight", total, max_parallel);

    let mut settled = futures_util::stream::iter(jobs)
        .map(|job| {
            debug!("Admitting panel {}", job.spec.index);
            run_job(job, options, client)
        })
        .buffer_unordered(max_parallel);

    let mut results = Vec::with_capacity(total);
    while let Some(result) = settled.next().await {
        results.push(result);
        on_progress(Progress {
            completed: results.len(),
            total,
        });
    }

    results.sort_by_key(PanelResult::index);
    results
}

async fn run_job(job: PanelJob, options: &GenerationOptions, client: &dyn ImageClient) -> PanelResult {
    let index = job.spec.index;
    let request = build_request(&job, options);
    let outcome = generate_with_retry(index, &request, options.retry, client).await;

    match &outcome {
        Ok(image) => info!(
            "Panel {} done ({} bytes, {})",
            index,
            image.bytes.len(),
            image.mime_type
        ),
        Err(e) => warn!("Panel {} failed: {}", index, e),
    }

    PanelResult {
        used_references: provenance(&job.references),
        composed_prompt: job.prompt,
        spec: job.spec,
        outcome,
    }
}

async fn generate_with_retry(
    index: usize,
    request: &ImageRequest,
    policy: RetryPolicy,
    client: &dyn ImageClient,
) -> ComicResult<PanelImage> {
    let mut attempt = 0;
    loop {
        match generate_once(request, client).await {
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay * attempt;
                warn!(
                    "Panel {} attempt {} failed ({}), retrying in {:?}",
                    index, attempt, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

async fn generate_once(request: &ImageRequest, client: &dyn ImageClient) -> ComicResult<PanelImage> {
    let response = client.generate(request).await?;
    extract_image(&response, client).await
}
