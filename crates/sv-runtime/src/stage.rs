use std::collections::BTreeMap;

use sv_core::{AudioItem, AudioItemKind, SceneAudioItem, VisualDirective};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    Speech,
    Reprompt,
    Recap,
}

#[derive(Debug, Clone, Default)]
struct TrackBuffer {
    groups: Vec<SceneAudioItem>,
    open: Option<SceneAudioItem>,
}

impl TrackBuffer {
    fn open_group(&mut self, scene_id: &str) -> &mut SceneAudioItem {
        self.open
            .get_or_insert_with(|| SceneAudioItem::new(scene_id))
    }

    fn close(&mut self) {
        if let Some(group) = self.open.take() {
            if !group.is_empty() {
                self.groups.push(group);
            }
        }
    }
}

/// Per-turn scratch area for everything the listener will hear or see.
#[derive(Debug, Clone, Default)]
pub struct PlayStage {
    speech: TrackBuffer,
    reprompt: TrackBuffer,
    recap: TrackBuffer,
    current_scene: Option<String>,
    visited: Vec<String>,
    visuals: Vec<VisualDirective>,
}

impl PlayStage {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(&self, track: Track) -> &TrackBuffer {
        match track {
            Track::Speech => &self.speech,
            Track::Reprompt => &self.reprompt,
            Track::Recap => &self.recap,
        }
    }

    fn buffer_mut(&mut self, track: Track) -> &mut TrackBuffer {
        match track {
            Track::Speech => &mut self.speech,
            Track::Reprompt => &mut self.reprompt,
            Track::Recap => &mut self.recap,
        }
    }

    /// Closes whatever is open and opens a fresh group on every track.
    pub fn start_new_scene(&mut self, scene_id: &str) {
        self.close_scene();
        for track in [Track::Speech, Track::Reprompt, Track::Recap] {
            self.buffer_mut(track).open = Some(SceneAudioItem::new(scene_id));
        }
        self.current_scene = Some(scene_id.to_string());
    }

    pub fn current_scene(&self) -> Option<&str> {
        self.current_scene.as_deref()
    }

    pub fn append_foreground(&mut self, track: Track, items: impl IntoIterator<Item = AudioItem>) {
        let scene_id = self.current_scene.clone().unwrap_or_default();
        self.buffer_mut(track)
            .open_group(&scene_id)
            .foreground
            .extend(items);
    }

    pub fn append_background(&mut self, track: Track, item: AudioItem) {
        let scene_id = self.current_scene.clone().unwrap_or_default();
        self.buffer_mut(track)
            .open_group(&scene_id)
            .background
            .push(item);
    }

    /// Foreground items staged so far for the open scene.
    pub fn open_foreground(&self, track: Track) -> &[AudioItem] {
        self.buffer(track)
            .open
            .as_ref()
            .map(|group| group.foreground.as_slice())
            .unwrap_or_default()
    }

    pub fn close_scene(&mut self) {
        for track in [Track::Speech, Track::Reprompt, Track::Recap] {
            self.buffer_mut(track).close();
        }
    }

    /// Copies groups from an earlier turn into the track as they were.
    pub fn replay(&mut self, track: Track, groups: &[SceneAudioItem]) {
        let buffer = self.buffer_mut(track);
        buffer.close();
        buffer
            .groups
            .extend(groups.iter().filter(|group| !group.is_empty()).cloned());
    }

    /// Closed groups of a track.
    pub fn groups(&self, track: Track) -> &[SceneAudioItem] {
        &self.buffer(track).groups
    }

    pub fn has_content(&self, track: Track) -> bool {
        let buffer = self.buffer(track);
        !buffer.groups.is_empty() || buffer.open.as_ref().is_some_and(|group| !group.is_empty())
    }

    /// Merges adjacent speech items that sound the same into one item.
    pub fn condense(&mut self, keep_scenes_separate: bool) {
        for track in [Track::Speech, Track::Reprompt, Track::Recap] {
            let buffer = self.buffer_mut(track);
            let groups = std::mem::take(&mut buffer.groups);
            buffer.groups = condense_groups(groups, keep_scenes_separate);
        }
    }

    pub fn log_visit(&mut self, scene_id: &str) {
        self.visited.push(scene_id.to_string());
    }

    pub fn visited_scenes(&self) -> &[String] {
        &self.visited
    }

    /// A second directive from the same scene replaces the fields it names.
    pub fn stage_visual(&mut self, properties: BTreeMap<String, String>) {
        let scene_id = self.current_scene.clone();
        match self.visuals.last_mut() {
            Some(last) if last.scene_id == scene_id => last.properties.extend(properties),
            _ => self.visuals.push(VisualDirective {
                scene_id,
                properties,
            }),
        }
    }

    pub fn visuals(&self) -> &[VisualDirective] {
        &self.visuals
    }
}

fn condense_groups(groups: Vec<SceneAudioItem>, keep_scenes_separate: bool) -> Vec<SceneAudioItem> {
    let mut condensed: Vec<SceneAudioItem> = Vec::with_capacity(groups.len());
    for mut group in groups {
        let joins_previous = !keep_scenes_separate
            && group.background.is_empty()
            && condensed
                .last()
                .is_some_and(|previous| previous.background.is_empty());

        let mut items: Vec<AudioItem> = Vec::with_capacity(group.foreground.len());
        for item in group.foreground.drain(..) {
            let target = match items.last_mut() {
                Some(last) => Some(last),
                None if joins_previous => condensed
                    .last_mut()
                    .and_then(|previous| previous.foreground.last_mut()),
                None => None,
            };
            match target {
                Some(target) if sounds_alike(target, &item) => {
                    target.content.push(' ');
                    target.content.push_str(&item.content);
                }
                _ => items.push(item),
            }
        }
        group.foreground = items;
        if !group.is_empty() {
            condensed.push(group);
        }
    }
    condensed
}

fn sounds_alike(left: &AudioItem, right: &AudioItem) -> bool {
    left.kind == AudioItemKind::Speech
        && right.kind == AudioItemKind::Speech
        && left.options == right.options
        && left.volume == right.volume
        && left.delay == right.delay
}

#[cfg(test)]
mod stage_tests {
    use super::*;

    fn speech(text: &str) -> AudioItem {
        AudioItem::speech(text, "Joanna")
    }

    #[test]
    fn close_scene_flushes_only_non_empty_groups() {
        let mut stage = PlayStage::new();
        stage.start_new_scene("a");
        stage.append_foreground(Track::Speech, [speech("Hello")]);
        stage.start_new_scene("b");
        stage.close_scene();

        assert_eq!(stage.groups(Track::Speech).len(), 1);
        assert_eq!(stage.groups(Track::Speech)[0].scene_id, "a");
        assert!(stage.groups(Track::Reprompt).is_empty());
        assert!(!stage.has_content(Track::Recap));
    }

    #[test]
    fn condense_merges_across_scenes_unless_kept_separate() {
        let build = || {
            let mut stage = PlayStage::new();
            stage.start_new_scene("a");
            stage.append_foreground(Track::Speech, [speech("One."), speech("Two.")]);
            stage.start_new_scene("b");
            stage.append_foreground(Track::Speech, [speech("Three.")]);
            stage.close_scene();
            stage
        };

        let mut merged = build();
        merged.condense(false);
        let groups = merged.groups(Track::Speech);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].foreground, vec![speech("One. Two. Three.")]);

        let mut separate = build();
        separate.condense(true);
        let groups = separate.groups(Track::Speech);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].foreground, vec![speech("One. Two.")]);
        assert_eq!(groups[1].foreground, vec![speech("Three.")]);
    }

    #[test]
    fn condense_stops_at_different_voices_and_background_groups() {
        let mut stage = PlayStage::new();
        stage.start_new_scene("a");
        stage.append_foreground(
            Track::Speech,
            [speech("One."), AudioItem::speech("Two.", "Brian"), speech("Three.")],
        );
        stage.start_new_scene("b");
        stage.append_background(Track::Speech, AudioItem::audio("rain.mp3"));
        stage.append_foreground(Track::Speech, [speech("Four."), speech("Five.")]);
        stage.close_scene();
        stage.condense(false);

        let groups = stage.groups(Track::Speech);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].foreground.len(), 3);
        assert_eq!(groups[1].foreground, vec![speech("Four. Five.")]);
    }

    #[test]
    fn replay_copies_previous_groups() {
        let mut previous = SceneAudioItem::new("old");
        previous.foreground.push(speech("Again."));
        let mut stage = PlayStage::new();
        stage.replay(Track::Reprompt, &[previous.clone(), SceneAudioItem::new("empty")]);
        assert_eq!(stage.groups(Track::Reprompt), &[previous]);
    }

    #[test]
    fn visuals_merge_within_a_scene() {
        let mut stage = PlayStage::new();
        stage.start_new_scene("a");
        stage.stage_visual(BTreeMap::from([("image".to_string(), "a.png".to_string())]));
        stage.stage_visual(BTreeMap::from([
            ("image".to_string(), "b.png".to_string()),
            ("title".to_string(), "Hall".to_string()),
        ]));
        stage.start_new_scene("b");
        stage.stage_visual(BTreeMap::from([("image".to_string(), "c.png".to_string())]));

        let visuals = stage.visuals();
        assert_eq!(visuals.len(), 2);
        assert_eq!(visuals[0].properties["image"], "b.png");
        assert_eq!(visuals[0].properties["title"], "Hall");
        assert_eq!(visuals[1].scene_id.as_deref(), Some("b"));
    }

    #[test]
    fn open_foreground_exposes_staged_items() {
        let mut stage = PlayStage::new();
        stage.start_new_scene("a");
        stage.append_foreground(Track::Reprompt, [speech("Which way?")]);
        assert_eq!(stage.open_foreground(Track::Reprompt), &[speech("Which way?")]);
        stage.log_visit("a");
        assert_eq!(stage.visited_scenes(), &["a".to_string()]);
    }
}
