use std::collections::BTreeMap;

use sv_core::{Scene, StoryError};

/// Read-only access to the compiled scene graph.
pub trait StoryGraph: Send + Sync {
    fn scene(&self, id: &str) -> Option<&Scene>;

    fn has_scene(&self, id: &str) -> bool {
        self.scene(id).is_some()
    }
}

/// Scene graph held in memory, keyed case-insensitively by scene id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStory {
    scenes: BTreeMap<String, Scene>,
}

impl InMemoryStory {
    pub fn new(scenes: Vec<Scene>) -> Self {
        Self {
            scenes: scenes
                .into_iter()
                .map(|scene| (scene_key(&scene.id), scene))
                .collect(),
        }
    }

    /// Reads the compiled graph file: a JSON array of scenes.
    pub fn from_json(raw: &str) -> Result<Self, StoryError> {
        let scenes: Vec<Scene> = serde_json::from_str(raw).map_err(|error| {
            StoryError::new(
                "STORY_JSON_INVALID",
                format!("Compiled story is not a valid scene list: {}", error),
            )
        })?;
        Ok(Self::new(scenes))
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

impl StoryGraph for InMemoryStory {
    fn scene(&self, id: &str) -> Option<&Scene> {
        self.scenes.get(&scene_key(id))
    }
}

fn scene_key(id: &str) -> String {
    id.trim().to_lowercase()
}
