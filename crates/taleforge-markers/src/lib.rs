//! Inline marker grammar — splits DM narration into typed segments.
//!
//! Markers:
//!   `[NARRATE]` text...        narrator voice TTS
//!   `[NPC:name]` "dialogue"    NPC voice TTS (looked up from the voice registry)
//!   `[AMBIENT:description]`    crossfade/trigger an ambient loop
//!   `[SFX:description]`        one-shot sound effect
//!   `[ROLL:notation:label]`    dice roll, resolved server-side

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// The closed set of segment kinds the wire grammar recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Narrate,
    Npc,
    Ambient,
    Sfx,
    Roll,
}

impl SegmentKind {
    /// Parse a marker keyword case-insensitively. Returns `None` for anything
    /// outside the closed set — the caller treats that as literal narration.
    pub fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "NARRATE" => Some(Self::Narrate),
            "NPC" => Some(Self::Npc),
            "AMBIENT" => Some(Self::Ambient),
            "SFX" => Some(Self::Sfx),
            "ROLL" => Some(Self::Roll),
            _ => None,
        }
    }

    /// Whether this kind carries trailing body text (vs. being metadata-only).
    pub fn carries_body(self) -> bool {
        matches!(self, Self::Narrate | Self::Npc)
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Narrate => "narrate",
            Self::Npc => "npc",
            Self::Ambient => "ambient",
            Self::Sfx => "sfx",
            Self::Roll => "roll",
        };
        f.write_str(s)
    }
}

/// The unit exchanged between the parser and the audio pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub kind: SegmentKind,
    /// Utterance text; empty for ambient/sfx/roll.
    pub content: String,
    /// NPC name, ambient/sfx description, or dice notation(+label); empty for narrate.
    pub meta: String,
}

impl Segment {
    pub fn narrate(content: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Narrate,
            content: content.into(),
            meta: String::new(),
        }
    }

    pub fn npc(npc_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Npc,
            content: content.into(),
            meta: npc_name.into(),
        }
    }

    pub fn ambient(description: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Ambient,
            content: String::new(),
            meta: description.into(),
        }
    }

    pub fn sfx(description: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Sfx,
            content: String::new(),
            meta: description.into(),
        }
    }
}

/// The `(kind, npc_name)` cursor the parser maintains across a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceContext {
    pub kind: SegmentKind,
    pub npc_name: String,
}

impl Default for VoiceContext {
    fn default() -> Self {
        Self {
            kind: SegmentKind::Narrate,
            npc_name: String::new(),
        }
    }
}

/// A marker found at a byte offset: its kind, payload, and the `[...]` span.
struct Marker<'a> {
    kind: SegmentKind,
    payload: &'a str,
    start: usize,
    end: usize,
}

fn marker_regex() -> &'static Regex {
    // `[` KIND (`:` PAYLOAD)? `]` — PAYLOAD runs up to the first `]`.
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\[(NARRATE|NPC|AMBIENT|SFX|ROLL)(?::([^\]]*))?\]").unwrap()
    })
}

fn find_markers(text: &str) -> Vec<Marker<'_>> {
    marker_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0).unwrap();
            let kind = SegmentKind::parse(&caps[1])?;
            let payload = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            Some(Marker {
                kind,
                payload,
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect()
}

/// Parse a complete text into an ordered stream of Segments.
///
/// Text with no recognizable markers at all is returned whole as a single
/// `narrate` segment (trimmed), matching the streaming parser's behavior when
/// nothing ever switches voice context.
pub fn batch_parse(text: &str) -> Vec<Segment> {
    let markers = find_markers(text);

    if markers.is_empty() {
        let trimmed = text.trim();
        return if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![Segment::narrate(trimmed)]
        };
    }

    let mut segments = Vec::new();
    for (i, marker) in markers.iter().enumerate() {
        let body_end = markers.get(i + 1).map(|m| m.start).unwrap_or(text.len());
        let body = text[marker.end..body_end].trim();

        match marker.kind {
            SegmentKind::Ambient | SegmentKind::Sfx => {
                segments.push(Segment {
                    kind: marker.kind,
                    content: String::new(),
                    meta: marker.payload.trim().to_string(),
                });
            }
            SegmentKind::Roll => {
                segments.push(Segment {
                    kind: SegmentKind::Roll,
                    content: String::new(),
                    meta: marker.payload.to_string(),
                });
            }
            SegmentKind::Narrate | SegmentKind::Npc => {
                if !body.is_empty() {
                    segments.push(Segment {
                        kind: marker.kind,
                        content: body.to_string(),
                        meta: marker.payload.trim().to_string(),
                    });
                }
            }
        }
    }
    segments
}

/// Produce display-safe text: drop AMBIENT/SFX/ROLL entirely, drop
/// `[NARRATE]`, rewrite `[NPC:Name]` as `"Name: "`. Collapses 3+ newlines to 2.
pub fn strip(text: &str) -> String {
    let markers = find_markers(text);
    if markers.is_empty() {
        return collapse_newlines(text.trim());
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for marker in &markers {
        out.push_str(&text[cursor..marker.start]);
        match marker.kind {
            SegmentKind::Ambient | SegmentKind::Sfx | SegmentKind::Roll => {}
            SegmentKind::Narrate => {}
            SegmentKind::Npc => {
                out.push_str(marker.payload.trim());
                out.push_str(": ");
            }
        }
        cursor = marker.end;
    }
    out.push_str(&text[cursor..]);
    collapse_newlines(out.trim())
}

fn collapse_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = 0;
    for ch in text.chars() {
        if ch == '\n' {
            run += 1;
            if run <= 2 {
                out.push(ch);
            }
        } else {
            run = 0;
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_narration_npc_sfx() {
        let text = "[NARRATE] You enter the tavern. The fire crackles. [SFX:fire crackling] \
                    [NPC:Barkeep] \"What'll it be, stranger?\"";
        let segs = batch_parse(text);
        assert_eq!(
            segs,
            vec![
                Segment::narrate("You enter the tavern. The fire crackles."),
                Segment::sfx("fire crackling"),
                Segment::npc("Barkeep", "\"What'll it be, stranger?\""),
            ]
        );
    }

    #[test]
    fn no_markers_is_one_narrate_segment() {
        let segs = batch_parse("  just prose, no markers at all  ");
        assert_eq!(segs, vec![Segment::narrate("just prose, no markers at all")]);
    }

    #[test]
    fn roll_marker_carries_raw_tail() {
        let segs = batch_parse("[ROLL:1d20+3:Stealth check]");
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].kind, SegmentKind::Roll);
        assert_eq!(segs[0].meta, "1d20+3:Stealth check");
    }

    #[test]
    fn unrecognized_bracket_passes_through_as_narration() {
        let segs = batch_parse("[NARRATE] The sign reads [WARNING]. Beware.");
        assert_eq!(segs.len(), 1);
        assert!(segs[0].content.contains("[WARNING]"));
    }

    #[test]
    fn strip_drops_ambient_sfx_roll_and_narrate() {
        let text = "[NARRATE] Hello. [SFX:thunder] [NPC:Zog] Grr. [ROLL:1d20]";
        assert_eq!(strip(text), "Hello. Zog: Grr.");
    }

    #[test]
    fn strip_collapses_excess_newlines() {
        let text = "line one\n\n\n\nline two";
        assert_eq!(strip(text), "line one\n\nline two");
    }

    #[test]
    fn strip_is_idempotent_over_batch_parse_rejoin() {
        let text = "[NARRATE] You enter. [NPC:Zog] Hi there.";
        let once = strip(text);
        let twice = strip(&once);
        assert_eq!(once, twice);
    }
}
