//! Image resolution: find a local image for a reference, or build one

use crate::prompt::{normalize_path, ImageChoice, Prompter, DOCKERFILE_PROMPT};
use crate::{CoreError, Result};
use eosic_config::{ImageConfig, DEFAULT_IMAGE_REPOSITORY, DEFAULT_IMAGE_TAG};
use eosic_provider::demux::demux_build_log;
use eosic_provider::{BuildConfig, ContainerProvider, ImageSummary, LogSink, ProviderError};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// `repository:tag` the environment runs on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Rendered `repository:tag`
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

impl Default for ImageRef {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_REPOSITORY, DEFAULT_IMAGE_TAG)
    }
}

impl From<&ImageConfig> for ImageRef {
    fn from(config: &ImageConfig) -> Self {
        Self::new(&config.repository, &config.tag)
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// A local image chosen for the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub id: String,
    pub repo_tags: Vec<String>,
}

impl ResolvedImage {
    /// First repo tag, or the id for untagged images
    pub fn reference(&self) -> &str {
        self.repo_tags.first().map(String::as_str).unwrap_or(&self.id)
    }
}

impl From<ImageSummary> for ResolvedImage {
    fn from(summary: ImageSummary) -> Self {
        Self {
            id: summary.id,
            repo_tags: summary.repo_tags,
        }
    }
}

/// Decides whether a repo tag belongs to an image reference.
///
/// A tag matches when it contains `repository:tag`, or when the reference
/// read as a regular expression matches it.
#[derive(Debug, Clone)]
pub struct TagMatcher {
    needle: String,
    pattern: Option<Regex>,
}

impl TagMatcher {
    pub fn new(image: &ImageRef) -> Self {
        let needle = image.reference();
        let pattern = Regex::new(&needle).ok();
        Self { needle, pattern }
    }

    pub fn matches(&self, repo_tag: &str) -> bool {
        repo_tag.contains(&self.needle)
            || self
                .pattern
                .as_ref()
                .is_some_and(|pattern| pattern.is_match(repo_tag))
    }

    /// First image in list order with a matching tag
    pub fn find(&self, images: &[ImageSummary]) -> Option<ResolvedImage> {
        images
            .iter()
            .find(|image| image.repo_tags.iter().any(|tag| self.matches(tag)))
            .cloned()
            .map(ResolvedImage::from)
    }
}

/// Finds or builds the image for an [`ImageRef`]
pub struct ImageResolver<'a> {
    provider: &'a dyn ContainerProvider,
    prompter: &'a dyn Prompter,
    cwd: PathBuf,
    default_dockerfile: Option<PathBuf>,
    max_build_attempts: u32,
}

impl<'a> ImageResolver<'a> {
    pub fn new(
        provider: &'a dyn ContainerProvider,
        prompter: &'a dyn Prompter,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        Self {
            provider,
            prompter,
            cwd: cwd.into(),
            default_dockerfile: None,
            max_build_attempts: 1,
        }
    }

    /// Dockerfile offered as the prompt default instead of `<cwd>/Dockerfile`
    pub fn with_default_dockerfile(mut self, path: Option<PathBuf>) -> Self {
        self.default_dockerfile = path;
        self
    }

    pub fn with_max_build_attempts(mut self, attempts: u32) -> Self {
        self.max_build_attempts = attempts;
        self
    }

    /// Look for a local image without prompting
    pub async fn find(&self, image: &ImageRef) -> Result<Option<ResolvedImage>> {
        let images = self.provider.list_images().await?;
        debug!("Engine reports {} local images", images.len());
        Ok(TagMatcher::new(image).find(&images))
    }

    /// Return a local image for `image`, building one interactively when
    /// none exists. Build output goes to `sink`.
    pub async fn resolve(&self, image: &ImageRef, sink: &mut dyn LogSink) -> Result<ResolvedImage> {
        let mut builds = 0;
        loop {
            if let Some(found) = self.find(image).await? {
                info!("Using image {} ({})", found.reference(), short_id(&found.id));
                return Ok(found);
            }

            if builds >= self.max_build_attempts {
                warn!("No image matching {} after {} build(s)", image, builds);
                return Err(CoreError::ImageNotFound(image.reference()));
            }

            self.ask_and_build(image, sink).await?;
            builds += 1;
        }
    }

    async fn ask_and_build(&self, image: &ImageRef, sink: &mut dyn LogSink) -> Result<()> {
        let index = self
            .prompter
            .select(ImageChoice::PROMPT, &ImageChoice::labels(), 0)?;

        match ImageChoice::from_index(index) {
            Some(ImageChoice::Build) => {
                let dockerfile = self.ask_dockerfile()?;
                self.build(image, &dockerfile, sink).await
            }
            Some(ImageChoice::SelectPrebuilt) => Err(CoreError::NotImplemented(
                "selecting a prebuilt image".to_string(),
            )),
            Some(ImageChoice::Cancel) => Err(CoreError::Cancelled),
            None => Err(CoreError::Prompt(format!("No choice at index {}", index))),
        }
    }

    fn ask_dockerfile(&self) -> Result<PathBuf> {
        let default = self
            .default_dockerfile
            .as_ref()
            .map(|path| normalize_path(&path.to_string_lossy(), &self.cwd))
            .unwrap_or_else(|| self.cwd.join("Dockerfile"));

        let answer = self
            .prompter
            .input(DOCKERFILE_PROMPT, &default.to_string_lossy())?;
        Ok(normalize_path(&answer, &self.cwd))
    }

    /// Build `image` from the Dockerfile at `dockerfile`
    pub async fn build(
        &self,
        image: &ImageRef,
        dockerfile: &Path,
        sink: &mut dyn LogSink,
    ) -> Result<()> {
        let config = build_config(image, dockerfile)?;
        info!("Building image {} from {}", image, dockerfile.display());

        let stream = self.provider.build(&config).await.map_err(build_failure)?;
        let built = demux_build_log(stream, sink).await.map_err(build_failure)?;

        match built {
            Some(id) => info!("Built image {}", short_id(&id)),
            None => debug!("Build finished without reporting an image id"),
        }
        Ok(())
    }
}

fn build_config(image: &ImageRef, dockerfile: &Path) -> Result<BuildConfig> {
    let context = dockerfile
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .ok_or_else(|| CoreError::BuildFailed(format!("{} has no parent directory", dockerfile.display())))?;
    let name = dockerfile
        .file_name()
        .ok_or_else(|| CoreError::BuildFailed(format!("{} is not a file", dockerfile.display())))?;

    if !dockerfile.is_file() {
        return Err(CoreError::BuildFailed(format!(
            "Dockerfile not found: {}",
            dockerfile.display()
        )));
    }

    let mut labels = HashMap::new();
    labels.insert("eosic".to_string(), "true".to_string());

    Ok(BuildConfig {
        context: context.to_path_buf(),
        dockerfile: name.to_string_lossy().into_owned(),
        tag: image.reference(),
        labels,
        no_cache: false,
        pull: false,
    })
}

fn build_failure(err: ProviderError) -> CoreError {
    match err {
        ProviderError::BuildError(msg) | ProviderError::Stream(msg) => CoreError::BuildFailed(msg),
        other => CoreError::Provider(other),
    }
}

fn short_id(id: &str) -> &str {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    id.get(..12).unwrap_or(id)
}
