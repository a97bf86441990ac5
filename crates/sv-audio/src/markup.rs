use std::borrow::Cow;
use std::collections::BTreeSet;

use roxmltree::{Document, Node, NodeType};
use sv_core::{AudioItem, AudioItemKind, AudioOptions, SceneAudioItem, DEFAULT_VOLUME};
use tracing::warn;

const ROOT_TAG: &str = "speak";
const NAMESPACE_BASE: &str = "urn:storyvoice:ssml:";
/// Alexa narration uses these without declaring them.
const KNOWN_PREFIXES: &[&str] = &["amazon"];

/// Splits inline narration markup into audio items. Only `<audio/>` and
/// `<voice>` are recognized; everything between them, other tags included,
/// stays as a literal run. A run becomes a speech item when a narrator voice
/// is configured and a text item otherwise.
///
/// Text and speech content is markup: entities stay escaped and unknown
/// elements are kept as written.
pub fn parse_markup(text: &str, default_voice: Option<&str>) -> Vec<AudioItem> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let body = escape_bare_ampersands(text);
    let source = wrap_in_root(&body);
    let document = match Document::parse(&source) {
        Ok(document) => document,
        Err(error) => {
            warn!(%error, "narration markup did not parse; keeping it as plain text");
            return text_run(&escape_bare_ampersands(&strip_tags(text)), default_voice)
                .into_iter()
                .collect();
        }
    };

    let mut items = Vec::new();
    let mut run = String::new();
    for child in document.root_element().children() {
        match recognized_tag(child) {
            Some("audio") => {
                flush_run(&mut run, default_voice, &mut items);
                items.extend(audio_element(child));
            }
            Some("voice") => {
                flush_run(&mut run, default_voice, &mut items);
                items.extend(voice_element(child, &source, default_voice));
            }
            _ => {
                if let Some(markup) = literal_markup(child, &source) {
                    run.push_str(&markup);
                }
            }
        }
    }
    flush_run(&mut run, default_voice, &mut items);
    items
}

fn wrap_in_root(body: &str) -> String {
    let declarations = namespace_prefixes(body)
        .into_iter()
        .map(|prefix| format!(" xmlns:{prefix}=\"{NAMESPACE_BASE}{prefix}\""))
        .collect::<String>();
    format!("<{ROOT_TAG}{declarations}>{body}</{ROOT_TAG}>")
}

/// Every `name:` that could be an element or attribute prefix. Declaring a
/// prefix that turns out to be plain text is harmless.
fn namespace_prefixes(body: &str) -> BTreeSet<&str> {
    let mut prefixes: BTreeSet<&str> = KNOWN_PREFIXES.iter().copied().collect();
    let mut previous = ' ';
    for (index, ch) in body.char_indices() {
        let starts_name = matches!(previous, '<' | '/') || previous.is_whitespace();
        previous = ch;
        if !starts_name || !(ch.is_ascii_alphabetic() || ch == '_') {
            continue;
        }
        let rest = &body[index..];
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
            .unwrap_or(rest.len());
        if rest[end..].starts_with(':') {
            let prefix = &rest[..end];
            if !prefix.eq_ignore_ascii_case("xml") && !prefix.eq_ignore_ascii_case("xmlns") {
                prefixes.insert(prefix);
            }
        }
    }
    prefixes
}

/// Unprefixed `audio` or `voice` elements.
fn recognized_tag(node: Node<'_, '_>) -> Option<&'static str> {
    if !node.is_element() || node.tag_name().namespace().is_some() {
        return None;
    }
    match node.tag_name().name() {
        "audio" => Some("audio"),
        "voice" => Some("voice"),
        _ => None,
    }
}

fn literal_markup<'s>(node: Node<'_, '_>, source: &'s str) -> Option<Cow<'s, str>> {
    match node.node_type() {
        NodeType::Text => node.text().map(|text| Cow::Owned(escape_text(text))),
        NodeType::Element => source.get(node.range()).map(Cow::Borrowed),
        _ => None,
    }
}

fn flush_run(run: &mut String, default_voice: Option<&str>, out: &mut Vec<AudioItem>) {
    if let Some(item) = text_run(run, default_voice) {
        out.push(item);
    }
    run.clear();
}

fn text_run(raw: &str, default_voice: Option<&str>) -> Option<AudioItem> {
    let text = collapse_whitespace(raw);
    if text.is_empty() {
        return None;
    }
    Some(match default_voice {
        Some(voice) => AudioItem::speech(text, voice),
        None => AudioItem::text(text),
    })
}

fn audio_element(node: Node<'_, '_>) -> Option<AudioItem> {
    let source = non_empty_attribute(node, "src")?;
    let mut item = AudioItem::audio(source);
    if let Some(volume) = node.attribute("volume").and_then(parse_volume) {
        item.volume = volume;
    }
    if let Some(delay) = node.attribute("delay").and_then(parse_seconds) {
        item.delay = delay;
    }
    item.options.blend = non_empty_attribute(node, "blend");
    Some(item)
}

fn voice_element(node: Node<'_, '_>, source: &str, default_voice: Option<&str>) -> Option<AudioItem> {
    let inner = node
        .children()
        .filter_map(|child| literal_markup(child, source))
        .collect::<String>();
    let text = collapse_whitespace(&inner);
    if text.is_empty() {
        return None;
    }

    let mut item = AudioItem {
        kind: AudioItemKind::Speech,
        content: text,
        volume: DEFAULT_VOLUME,
        delay: 0.0,
        options: AudioOptions {
            voice: non_empty_attribute(node, "name").or_else(|| default_voice.map(str::to_string)),
            pitch: non_empty_attribute(node, "pitch"),
            rate: non_empty_attribute(node, "rate"),
            engine: non_empty_attribute(node, "engine"),
            blend: None,
        },
    };
    if let Some(volume) = node.attribute("volume").and_then(parse_volume) {
        item.volume = volume;
    }
    if let Some(delay) = node.attribute("delay").and_then(parse_seconds) {
        item.delay = delay;
    }
    Some(item)
}

fn non_empty_attribute(node: Node<'_, '_>, name: &str) -> Option<String> {
    node.attribute(name)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Accepts `0.5` or `50%`.
fn parse_volume(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let value = match trimmed.strip_suffix('%') {
        Some(percent) => percent.trim().parse::<f64>().ok()? / 100.0,
        None => trimmed.parse::<f64>().ok()?,
    };
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Accepts `1.5`, `1.5s` or `1500ms`. Negative values are kept.
fn parse_seconds(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let value = if let Some(millis) = trimmed.strip_suffix("ms") {
        millis.trim().parse::<f64>().ok()? / 1000.0
    } else if let Some(seconds) = trimmed.strip_suffix('s') {
        seconds.trim().parse::<f64>().ok()?
    } else {
        trimmed.parse::<f64>().ok()?
    };
    value.is_finite().then_some(value)
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn escape_bare_ampersands(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (index, ch) in text.char_indices() {
        if ch == '&' && !starts_with_entity(&text[index + 1..]) {
            out.push_str("&amp;");
        } else {
            out.push(ch);
        }
    }
    out
}

fn starts_with_entity(rest: &str) -> bool {
    let Some(end) = rest.find(';') else {
        return false;
    };
    let name = &rest[..end];
    if let Some(numeric) = name.strip_prefix('#') {
        return match numeric.strip_prefix('x').or_else(|| numeric.strip_prefix('X')) {
            Some(hex) => !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()),
            None => !numeric.is_empty() && numeric.chars().all(|c| c.is_ascii_digit()),
        };
    }
    !name.is_empty() && name.len() <= 8 && name.chars().all(|c| c.is_ascii_alphabetic())
}

fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Flattens scene groups into render order: each scene's background first.
pub fn flatten_scenes(scenes: &[SceneAudioItem]) -> Vec<AudioItem> {
    scenes
        .iter()
        .flat_map(|scene| scene.background.iter().chain(scene.foreground.iter()))
        .cloned()
        .collect()
}

pub fn render_markup(items: &[AudioItem]) -> String {
    items
        .iter()
        .map(render_item)
        .filter(|rendered| !rendered.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_item(item: &AudioItem) -> String {
    match item.kind {
        AudioItemKind::Text => escape_bare_ampersands(&item.content),
        AudioItemKind::Audio => format!("<audio src=\"{}\"/>", escape_attr(&item.content)),
        AudioItemKind::Speech => {
            let mut body = escape_bare_ampersands(&item.content);
            if let Some(prosody) = prosody_attributes(item) {
                body = format!("<prosody{}>{}</prosody>", prosody, body);
            }
            match &item.options.voice {
                Some(voice) => format!("<voice name=\"{}\">{}</voice>", escape_attr(voice), body),
                None => body,
            }
        }
    }
}

fn prosody_attributes(item: &AudioItem) -> Option<String> {
    let mut attributes = String::new();
    if let Some(pitch) = item.options.pitch.as_deref().filter(|p| !is_default_level(p)) {
        attributes.push_str(&format!(" pitch=\"{}\"", escape_attr(pitch)));
    }
    if let Some(rate) = item.options.rate.as_deref().filter(|r| !is_default_level(r)) {
        attributes.push_str(&format!(" rate=\"{}\"", escape_attr(rate)));
    }
    if (item.volume - DEFAULT_VOLUME).abs() > f64::EPSILON {
        attributes.push_str(&format!(" volume=\"{}\"", format_decibels(item.volume)));
    }
    (!attributes.is_empty()).then_some(attributes)
}

fn is_default_level(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "" | "medium" | "default" | "100%" | "+0%" | "0%"
    )
}

fn format_decibels(volume: f64) -> String {
    if volume <= 0.0 {
        return "silent".to_string();
    }
    format!("{:+.1}dB", 20.0 * volume.log10())
}

/// Readable preview of what the listener hears, without markup.
pub fn plain_text(scenes: &[SceneAudioItem]) -> String {
    flatten_scenes(scenes)
        .iter()
        .filter(|item| item.kind != AudioItemKind::Audio)
        .map(|item| markup_to_plain(&item.content))
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn markup_to_plain(markup: &str) -> String {
    collapse_whitespace(&strip_tags(markup))
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

pub fn escape_text(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn escape_attr(raw: &str) -> String {
    escape_text(raw).replace('"', "&quot;")
}
