//! Scripted service doubles shared by the unit tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::error::{ComicError, ComicResult};
use crate::core::state::PanelSpec;
use crate::services::image::{
    FetchedFile, ImageClient, ImageRequest, ImageResponse, RequestPart, ResponsePart,
};
use crate::services::llm::LlmClient;

pub fn spec(index: usize) -> PanelSpec {
    PanelSpec {
        index,
        title: format!("Title {}", index),
        visual_description: format!("scene-{} in the rain", index),
        dialogue: String::new(),
        caption: format!("Caption {}", index),
        mentioned_characters: Vec::new(),
    }
}

/// Recovers the panel number from the `scene-N` marker in the prompt.
pub fn panel_number(request: &ImageRequest) -> usize {
    let text = request
        .parts
        .iter()
        .find_map(|p| match p {
            RequestPart::Text(t) => Some(t.as_str()),
            _ => None,
        })
        .unwrap_or_default();
    let start = text.find("scene-").map(|i| i + "scene-".len()).unwrap_or(0);
    text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

#[derive(Default)]
pub struct MockImageClient {
    pub fail_panels: HashSet<usize>,
    pub timeout_panels: HashSet<usize>,
    /// Panel -> number of transient failures before succeeding.
    pub flaky_panels: Mutex<HashMap<usize, u32>>,
    pub delays_ms: HashMap<usize, u64>,
    /// Panels answered with a `mock://panel-N` file reference instead of inline bytes.
    pub file_ref_panels: HashSet<usize>,
    /// Downloads that fail before `fetch_file` starts succeeding.
    pub fetch_failures: Mutex<u32>,
    pub fetches: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub dispatched: Mutex<Vec<usize>>,
    pub completed: Mutex<Vec<usize>>,
    pub requests: Mutex<Vec<ImageRequest>>,
}

impl MockImageClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(panels: &[usize]) -> Self {
        Self {
            fail_panels: panels.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub fn with_delays(mut self, delays: &[(usize, u64)]) -> Self {
        self.delays_ms = delays.iter().copied().collect();
        self
    }

    pub fn max_seen(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageClient for MockImageClient {
    async fn generate(&self, request: &ImageRequest) -> ComicResult<ImageResponse> {
        let panel = panel_number(request);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.dispatched.lock().unwrap().push(panel);
        self.requests.lock().unwrap().push(request.clone());

        let delay = self.delays_ms.get(&panel).copied().unwrap_or(5);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.lock().unwrap().push(panel);

        if self.fail_panels.contains(&panel) {
            return Err(ComicError::service(format!("panel {} rejected", panel)));
        }
        if self.timeout_panels.contains(&panel) {
            return Err(ComicError::service("request timed out after 120s"));
        }
        {
            let mut flaky = self.flaky_panels.lock().unwrap();
            if let Some(left) = flaky.get_mut(&panel) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ComicError::service("503 overloaded"));
                }
            }
        }

        if self.file_ref_panels.contains(&panel) {
            return Ok(ImageResponse {
                parts: vec![ResponsePart::FileRef {
                    uri: format!("mock://panel-{}", panel),
                    mime_type: None,
                }],
                finish_reason: Some("STOP".to_string()),
            });
        }

        Ok(ImageResponse {
            parts: vec![ResponsePart::InlineImage {
                mime_type: "image/png".to_string(),
                data: format!("png-{}", panel).into_bytes(),
            }],
            finish_reason: Some("STOP".to_string()),
        })
    }

    async fn fetch_file(&self, uri: &str) -> ComicResult<FetchedFile> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let Some(panel) = uri.strip_prefix("mock://panel-") else {
            return Err(ComicError::fetch(format!("{} unreachable", uri)));
        };
        {
            let mut left = self.fetch_failures.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(ComicError::fetch(format!("{} reset by peer", uri)));
            }
        }
        Ok(FetchedFile {
            bytes: format!("png-{}", panel).into_bytes(),
            content_type: Some("image/png".to_string()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MockLlm {
    pub response: String,
    pub calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockLlm {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string()));
        Ok(self.response.clone())
    }
}
