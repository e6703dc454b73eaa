pub type ComicResult<T> = Result<T, ComicError>;

/// Failures produced while planning and rendering a comic.
///
/// `PlanFormat` and `Config` abort a run before any panel is dispatched.
/// The remaining variants are scoped to a single panel and end up on its
/// `PanelResult` instead of failing the run.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ComicError {
    #[error("plan format error: {0}")]
    PlanFormat(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("no image returned: {0}")]
    NoImageReturned(String),

    #[error("service error: {0}")]
    Service(String),

    #[error("fetch error: {0}")]
    Fetch(String),
}

impl ComicError {
    pub fn plan_format(msg: impl Into<String>) -> Self {
        Self::PlanFormat(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn no_image(msg: impl Into<String>) -> Self {
        Self::NoImageReturned(msg.into())
    }

    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service(msg.into())
    }

    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Self::PlanFormat(_) | Self::Config(_))
    }

    /// Errors worth another attempt under a retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Service(_) | Self::Fetch(_))
    }
}
