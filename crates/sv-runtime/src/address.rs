use sv_core::{Instruction, SessionState, StoryError};

use crate::story::StoryGraph;

pub const ADDRESS_VERSION: u32 = 2;
const VERSION_MARKER: char = '@';
/// Version recorded for strings written before addresses were versioned.
const LEGACY_VERSION: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Scene,
    Choice,
    Condition,
    Jump,
    Legacy,
}

impl SegmentKind {
    fn letter(self) -> char {
        match self {
            Self::Scene => 'S',
            Self::Choice => 'C',
            Self::Condition => 'K',
            Self::Jump => 'J',
            Self::Legacy => 'L',
        }
    }

    fn from_letter(raw: &str) -> Option<Self> {
        match raw {
            "S" => Some(Self::Scene),
            "C" => Some(Self::Choice),
            "K" => Some(Self::Condition),
            "J" => Some(Self::Jump),
            "L" => Some(Self::Legacy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub scene_id: String,
    pub line: usize,
    pub payload: Option<String>,
}

/// A position inside the instruction graph that survives serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub version: u32,
    pub segments: Vec<Segment>,
}

impl Address {
    /// Fresh address pointing at `line` of one variation of a scene.
    pub fn scene(scene_id: &str, variation: usize, line: usize) -> Self {
        Self {
            version: ADDRESS_VERSION,
            segments: vec![Segment {
                kind: SegmentKind::Scene,
                scene_id: scene_id.to_string(),
                line,
                payload: Some(variation.to_string()),
            }],
        }
    }

    /// Address for an inline instruction list kept in the state memo table.
    pub fn legacy(key: &str) -> Self {
        Self {
            version: LEGACY_VERSION,
            segments: vec![Segment {
                kind: SegmentKind::Legacy,
                scene_id: String::new(),
                line: 0,
                payload: Some(key.to_string()),
            }],
        }
    }

    pub fn choice(&self, line: usize) -> Self {
        self.extend(SegmentKind::Choice, line)
    }

    pub fn condition(&self, line: usize) -> Self {
        self.extend(SegmentKind::Condition, line)
    }

    pub fn jump(&self, line: usize) -> Self {
        self.extend(SegmentKind::Jump, line)
    }

    /// Where execution continues after a call made at `line` returns.
    pub fn return_to(&self, line: usize) -> Self {
        self.extend(SegmentKind::Jump, line)
    }

    fn extend(&self, kind: SegmentKind, line: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment {
            kind,
            scene_id: self.scene_id().to_string(),
            line,
            payload: None,
        });
        Self {
            version: ADDRESS_VERSION,
            segments,
        }
    }

    /// Source scene of the last segment.
    pub fn scene_id(&self) -> &str {
        self.segments
            .last()
            .map(|segment| segment.scene_id.as_str())
            .unwrap_or_default()
    }

    /// Memo key when this address came from a pre-versioning string.
    pub fn legacy_key(&self) -> Option<&str> {
        self.segments
            .iter()
            .find(|segment| segment.kind == SegmentKind::Legacy)
            .and_then(|segment| segment.payload.as_deref())
    }

    pub fn encode(&self) -> String {
        if self.version == LEGACY_VERSION && self.segments.len() == 1 {
            if let Some(raw) = self.legacy_key() {
                return raw.to_string();
            }
        }

        let mut out = format!("{}{}", VERSION_MARKER, self.version);
        for segment in &self.segments {
            out.push(';');
            out.push(segment.kind.letter());
            out.push(':');
            out.push_str(&escape(&segment.scene_id));
            out.push(':');
            out.push_str(&segment.line.to_string());
            if let Some(payload) = &segment.payload {
                out.push(':');
                out.push_str(&escape(payload));
            }
        }
        out
    }

    pub fn decode(raw: &str) -> Result<Self, StoryError> {
        let Some(body) = raw.strip_prefix(VERSION_MARKER) else {
            return Ok(Self::legacy(raw));
        };

        let mut parts = body.split(';');
        let version = parts
            .next()
            .and_then(|value| value.parse::<u32>().ok())
            .ok_or_else(|| invalid(raw, "missing version"))?;
        if version == LEGACY_VERSION || version > ADDRESS_VERSION {
            return Err(StoryError::new(
                "ADDRESS_UNSUPPORTED_VERSION",
                format!("Address \"{}\" uses unsupported version {}.", raw, version),
            ));
        }

        let mut segments = Vec::new();
        for part in parts {
            let fields = part.split(':').collect::<Vec<_>>();
            if fields.len() < 3 || fields.len() > 4 {
                return Err(invalid(raw, "segment needs 3 or 4 fields"));
            }
            let kind = SegmentKind::from_letter(fields[0])
                .ok_or_else(|| invalid(raw, "unknown segment kind"))?;
            let line = fields[2]
                .parse::<usize>()
                .map_err(|_| invalid(raw, "line is not a number"))?;
            segments.push(Segment {
                kind,
                scene_id: unescape(fields[1]).ok_or_else(|| invalid(raw, "bad escape"))?,
                line,
                payload: match fields.get(3) {
                    Some(payload) => {
                        Some(unescape(payload).ok_or_else(|| invalid(raw, "bad escape"))?)
                    }
                    None => None,
                },
            });
        }
        if segments.is_empty() {
            return Err(invalid(raw, "no segments"));
        }

        Ok(Self { version, segments })
    }

    /// Walks the segments against the graph and returns the instructions that
    /// run from this position on. Out-of-range positions resolve to nothing.
    pub fn resolve(&self, story: &dyn StoryGraph, state: &SessionState) -> Vec<Instruction> {
        let mut running: Vec<Instruction> = Vec::new();
        for segment in &self.segments {
            running = match segment.kind {
                SegmentKind::Scene => {
                    let variation = segment
                        .payload
                        .as_deref()
                        .and_then(|value| value.parse::<usize>().ok())
                        .unwrap_or(0);
                    story
                        .scene(&segment.scene_id)
                        .and_then(|scene| scene.variations.get(variation))
                        .map(|variation| tail(&variation.instructions, segment.line))
                        .unwrap_or_default()
                }
                SegmentKind::Jump => tail(&running, segment.line.saturating_add(1)),
                SegmentKind::Condition => {
                    let mut branch = running
                        .get(segment.line)
                        .map(|instruction| instruction.instructions.clone())
                        .unwrap_or_default();
                    branch.extend(tail(&running, segment.line.saturating_add(1)));
                    branch
                }
                SegmentKind::Choice => running
                    .get(segment.line)
                    .map(|instruction| instruction.instructions.clone())
                    .unwrap_or_default(),
                SegmentKind::Legacy => segment
                    .payload
                    .as_deref()
                    .and_then(|key| state.instruction_memo.get(key))
                    .cloned()
                    .unwrap_or_default(),
            };
        }
        running
    }
}

fn tail(instructions: &[Instruction], from: usize) -> Vec<Instruction> {
    instructions.get(from..).map(<[_]>::to_vec).unwrap_or_default()
}

fn invalid(raw: &str, reason: &str) -> StoryError {
    StoryError::new(
        "ADDRESS_INVALID",
        format!("Address \"{}\" is malformed: {}.", raw, reason),
    )
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            ';' => out.push_str("%3B"),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(index) = rest.find('%') {
        out.push_str(&rest[..index]);
        let code = rest.get(index + 1..index + 3)?;
        out.push(match code.to_ascii_uppercase().as_str() {
            "25" => '%',
            "3A" => ':',
            "3B" => ';',
            _ => return None,
        });
        rest = &rest[index + 3..];
    }
    out.push_str(rest);
    Some(out)
}

#[cfg(test)]
mod address_tests {
    use super::*;
    use crate::story::InMemoryStory;
    use sv_core::InstructionKind;

    fn story() -> InMemoryStory {
        InMemoryStory::from_json(
            r#"[{"id":"hall","variations":[
                {"condition":"gold > 5","instructions":[{"kind":"SET","parameters":{"variableName":"rich"}}]},
                {"instructions":[
                    {"kind":"SET","parameters":{"variableName":"a"}},
                    {"kind":"CONDITION","parameters":{"condition":"true"},"instructions":[
                        {"kind":"FLAG","parameters":{"variableName":"inner"}}
                    ]},
                    {"kind":"CHOICE","parameters":{"utterances":"north"},"instructions":[
                        {"kind":"GO_TO","parameters":{"target":"north"}}
                    ]},
                    {"kind":"SET","parameters":{"variableName":"z"}}
                ]}
            ]}]"#,
        )
        .expect("story should parse")
    }

    fn names(instructions: &[Instruction]) -> Vec<String> {
        instructions
            .iter()
            .map(|instruction| {
                instruction
                    .param("variableName")
                    .or_else(|| instruction.param("target"))
                    .unwrap_or(instruction.kind.name())
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn encode_decode_roundtrips_built_addresses() {
        let base = Address::scene("dark:room;1%", 1, 2);
        let addresses = vec![
            base.clone(),
            base.condition(1),
            base.condition(1).choice(0),
            base.return_to(3).jump(0),
            Address::legacy("old-raw-address"),
            Address::legacy("old").return_to(4),
        ];
        for address in addresses {
            let encoded = address.encode();
            let decoded = Address::decode(&encoded).expect("address should decode");
            assert_eq!(decoded, address, "{}", encoded);
        }
        assert_eq!(
            Address::scene("dark:room;1%", 1, 2).encode(),
            "@2;S:dark%3Aroom%3B1%25:2:1"
        );
    }

    #[test]
    fn strings_without_marker_decode_as_legacy() {
        let address = Address::decode("scene-7/line-3").expect("legacy should decode");
        assert_eq!(address.version, 0);
        assert_eq!(address.segments.len(), 1);
        assert_eq!(address.segments[0].kind, SegmentKind::Legacy);
        assert_eq!(address.legacy_key(), Some("scene-7/line-3"));
        assert_eq!(address.encode(), "scene-7/line-3");
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        for raw in ["@", "@x;S:a:0", "@2", "@2;Q:a:0", "@2;S:a", "@2;S:a:one", "@9;S:a:0", "@2;S:a%zz:0"] {
            assert!(Address::decode(raw).is_err(), "{}", raw);
        }
        let error = Address::decode("@9;S:a:0").expect_err("future version");
        assert_eq!(error.code, "ADDRESS_UNSUPPORTED_VERSION");
    }

    #[test]
    fn resolve_follows_segment_semantics() {
        let story = story();
        let state = SessionState::default();
        let scene = Address::scene("hall", 1, 0);

        assert_eq!(names(&scene.resolve(&story, &state)), vec!["a", "CONDITION", "CHOICE", "z"]);
        assert_eq!(
            names(&Address::scene("hall", 1, 2).resolve(&story, &state)),
            vec!["CHOICE", "z"]
        );
        assert_eq!(names(&scene.jump(1).resolve(&story, &state)), vec!["CHOICE", "z"]);
        assert_eq!(
            names(&scene.condition(1).resolve(&story, &state)),
            vec!["inner", "CHOICE", "z"]
        );
        assert_eq!(names(&scene.choice(2).resolve(&story, &state)), vec!["north"]);
        assert_eq!(names(&Address::scene("hall", 0, 0).resolve(&story, &state)), vec!["rich"]);
    }

    #[test]
    fn resolve_tolerates_out_of_range_and_missing_memo() {
        let story = story();
        let state = SessionState::default();
        assert!(Address::scene("hall", 1, 40).resolve(&story, &state).is_empty());
        assert!(Address::scene("hall", 7, 0).resolve(&story, &state).is_empty());
        assert!(Address::scene("nowhere", 0, 0).resolve(&story, &state).is_empty());
        assert!(Address::scene("hall", 1, 0).choice(99).resolve(&story, &state).is_empty());
        assert!(Address::legacy("gone").resolve(&story, &state).is_empty());
    }

    #[test]
    fn legacy_segments_read_the_memo_table() {
        let story = story();
        let mut state = SessionState::default();
        state.instruction_memo.insert(
            "old".to_string(),
            vec![
                Instruction::new(InstructionKind::Flag).with_param("variableName", "one"),
                Instruction::new(InstructionKind::Flag).with_param("variableName", "two"),
            ],
        );
        let address = Address::decode("old").expect("legacy should decode");
        assert_eq!(names(&address.resolve(&story, &state)), vec!["one", "two"]);
        assert_eq!(names(&address.return_to(0).resolve(&story, &state)), vec!["two"]);
    }

    #[test]
    fn resolve_is_deterministic() {
        let story = story();
        let state = SessionState::default();
        let address = Address::scene("hall", 1, 0).condition(1);
        let first = serde_json::to_string(&address.resolve(&story, &state)).expect("json");
        let second = serde_json::to_string(&address.resolve(&story, &state)).expect("json");
        assert_eq!(first, second);
    }
}
