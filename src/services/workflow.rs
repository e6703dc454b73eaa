use crate::core::config::{Config, GenerationOptions};
use crate::core::error::ComicError;
use crate::core::io::Storage;
use crate::core::state::{PanelSpec, WorkflowState};
use crate::services::bundle::assemble;
use crate::services::characters::CharacterStore;
use crate::services::image::ImageClient;
use crate::services::llm::{chat_with_retry, LlmClient};
use crate::services::plan::{parse_plan, planning_prompt, story_prompt};
use crate::services::scheduler::{dispatch, prepare_jobs};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Summary of one processed story.
#[derive(Debug, Clone)]
pub struct StoryReport {
    pub story: String,
    pub bundle_path: String,
    pub panel_count: usize,
    pub missing_panels: Vec<usize>,
    /// Error of every panel that produced no image, by panel index.
    pub failures: Vec<(usize, ComicError)>,
}

impl StoryReport {
    pub fn is_partial(&self) -> bool {
        !self.missing_panels.is_empty()
    }

    pub fn failure(&self, index: usize) -> Option<&ComicError> {
        self.failures
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, e)| e)
    }
}

/// Raw plan response as cached in the build folder, with the page count it
/// was requested for.
#[derive(Serialize, Deserialize)]
struct CachedPlan {
    page_count: usize,
    response: String,
}

pub struct ComicWorkflow {
    config: Config,
    options: GenerationOptions,
    llm: Box<dyn LlmClient>,
    images: Box<dyn ImageClient>,
    storage: Arc<dyn Storage>,
    state: WorkflowState,
    store: CharacterStore,
}

impl ComicWorkflow {
    pub async fn new(
        config: Config,
        llm: Box<dyn LlmClient>,
        images: Box<dyn ImageClient>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        let options = GenerationOptions::from_config(&config.comic)?;
        let state = Self::load_state(&config.build_folder, storage.as_ref()).await?;
        let store = CharacterStore::load(&config.comic.characters, storage.as_ref()).await?;

        Ok(Self {
            config,
            options,
            llm,
            images,
            storage,
            state,
            store,
        })
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    pub fn characters(&self) -> &CharacterStore {
        &self.store
    }

    pub fn characters_mut(&mut self) -> &mut CharacterStore {
        &mut self.store
    }

    async fn load_state(build_dir: &str, storage: &dyn Storage) -> Result<WorkflowState> {
        let path = join(build_dir, "state.json");
        if storage.exists(&path).await? {
            let content = storage.read_to_string(&path).await?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(WorkflowState::default())
        }
    }

    async fn save_state(&self) -> Result<()> {
        let path = join(&self.config.build_folder, "state.json");
        let content = serde_json::to_string_pretty(&self.state)?;
        self.storage.write(&path, content.as_bytes()).await?;
        Ok(())
    }

    pub async fn run(&mut self) -> Result<Vec<StoryReport>> {
        let entries = self.storage.list(&self.config.input_folder).await?;
        let mut stories: Vec<String> = entries
            .into_iter()
            .filter(|e| e.ends_with(".txt"))
            .collect();
        stories.sort();

        let total = stories.len();
        let mut reports = Vec::new();

        for (i, path_str) in stories.iter().enumerate() {
            let filename = file_name(path_str);

            if self.state.completed_stories.contains(&filename) {
                info!("Skipping completed story: {}", filename);
                continue;
            }

            info!("Processing story: {}", filename);
            let report = self.process_story(path_str, &filename).await?;
            for (index, e) in &report.failures {
                warn!("{}: panel {} has no image: {}", filename, index, e);
            }
            reports.push(report);

            self.state.completed_stories.push(filename);
            self.save_state().await?;

            if !self.config.unattended && i + 1 < total {
                let ans = inquire::Confirm::new("Continue to next story?")
                    .with_default(true)
                    .prompt();

                match ans {
                    Ok(true) => {}
                    Ok(false) => {
                        info!("Stopping as requested.");
                        break;
                    }
                    Err(_) => {
                        warn!("Error reading input, stopping.");
                        break;
                    }
                }
            }
        }

        info!("All stories processed!");
        Ok(reports)
    }

    /// Returns the panel plan for a story, reusing the cached plan response
    /// when it was made for at least the current page count. A freshly
    /// generated plan replaces any earlier one.
    pub async fn plan_story(&self, filename: &str, text: &str) -> Result<Vec<PanelSpec>> {
        let plan_path = join(&self.story_build_dir(filename), "plan.json");

        if self.storage.exists(&plan_path).await? {
            let content = self.storage.read_to_string(&plan_path).await?;
            match serde_json::from_str::<CachedPlan>(&content) {
                Ok(cached) if cached.page_count >= self.options.page_count => {
                    info!("Loading cached plan from {}", plan_path);
                    return Ok(parse_plan(&cached.response, &self.options)?);
                }
                Ok(cached) => info!(
                    "Cached plan covers {} panel(s), {} requested; planning again",
                    cached.page_count, self.options.page_count
                ),
                Err(_) => warn!("Ignoring unreadable cached plan {}", plan_path),
            }
        }

        info!("Planning {} panel(s)...", self.options.page_count);
        let system = planning_prompt(&self.options, &self.store.names());
        let raw = chat_with_retry(
            self.llm.as_ref(),
            &system,
            &story_prompt(text),
            self.config.llm.retry_count,
            Duration::from_secs(self.config.llm.retry_delay_seconds),
        )
        .await
        .context("Panel planning failed")?;

        let panels = parse_plan(&raw, &self.options)?;
        let cached = CachedPlan {
            page_count: self.options.page_count,
            response: raw,
        };
        self.storage
            .write(&plan_path, serde_json::to_string_pretty(&cached)?.as_bytes())
            .await?;
        Ok(panels)
    }

    pub async fn process_story(&self, path_str: &str, filename: &str) -> Result<StoryReport> {
        let text = self.storage.read_to_string(path_str).await?;

        let panels = self.plan_story(filename, &text).await?;
        if panels.len() < self.options.page_count {
            warn!(
                "Plan has {} panel(s), {} requested",
                panels.len(),
                self.options.page_count
            );
        }

        let jobs = prepare_jobs(&panels, &self.options, &self.store)?;

        let pb = ProgressBar::new(jobs.len() as u64);
        pb.set_style(ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"));

        let results = dispatch(jobs, &self.options, self.images.as_ref(), |p| {
            pb.set_position(p.completed as u64)
        })
        .await;
        pb.finish_with_message("Panels complete");

        let bundle = assemble(&results, &self.options);
        let bundle_path = join(
            &self.config.output_folder,
            &format!("{}.tar.gz", story_stem(filename)),
        );
        self.storage
            .write(&bundle_path, &bundle.to_archive_bytes()?)
            .await?;
        info!(
            "Wrote {} ({} of {} panels)",
            bundle_path,
            bundle.images.len(),
            bundle.metadata.len()
        );

        Ok(StoryReport {
            story: filename.to_string(),
            bundle_path,
            panel_count: bundle.metadata.len(),
            missing_panels: bundle.missing_panels(),
            failures: results
                .iter()
                .filter_map(|r| r.error().map(|e| (r.index(), e.clone())))
                .collect(),
        })
    }

    fn story_build_dir(&self, filename: &str) -> String {
        join(&self.config.build_folder, &filename.replace('.', "_"))
    }
}

fn join(dir: &str, name: &str) -> String {
    Path::new(dir).join(name).to_string_lossy().to_string()
}

fn file_name(path_str: &str) -> String {
    Path::new(path_str)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path_str.to_string())
}

fn story_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string())
}
