use storybook_contracts::formats::{DimensionResolver, ResolvedDimensions};
use storybook_contracts::job::StoryConfig;

use crate::reference::ReferenceImageCache;
use crate::seed::SeedManager;

/// Per-job state: the style seed, processed reference images and the
/// resolved geometry. Dropped when the job finishes, so nothing leaks into
/// the next job handled by the same process.
#[derive(Debug, Clone)]
pub struct BatchContext {
    pub story_id: String,
    pub seeds: SeedManager,
    pub references: ReferenceImageCache,
    dimensions: Option<ResolvedDimensions>,
}

impl BatchContext {
    pub fn new(story_id: impl Into<String>, reference_size: u32) -> Self {
        Self {
            story_id: story_id.into(),
            seeds: SeedManager::new(),
            references: ReferenceImageCache::new(reference_size),
            dimensions: None,
        }
    }

    /// Seeds the context for its story. Call once, before any request is built.
    pub fn reset_seed(&mut self) -> i64 {
        let story_id = self.story_id.clone();
        self.seeds.get_seed(Some(&story_id), true)
    }

    pub fn dimensions(
        &mut self,
        resolver: &DimensionResolver,
        config: &StoryConfig,
    ) -> &ResolvedDimensions {
        self.dimensions.get_or_insert_with(|| {
            resolver.resolve(
                config.book_format.as_deref(),
                config.custom_width,
                config.custom_height,
            )
        })
    }
}
