//! Incremental marker/sentence scanner.
//!
//! Feed it raw DM text deltas as they arrive; it returns the `Segment`s that
//! became ready to voice (sentence-complete narration/dialogue, or
//! immediately-ready ambient/sfx/roll markers). Running the same text
//! through `feed` piecewise or all at once yields the same segments as
//! `taleforge_markers::batch_parse` would on the complete text.

use std::sync::OnceLock;

use regex::Regex;
use taleforge_markers::{Segment, SegmentKind};

/// Sentence-ending punctuation: `.`/`!`/`?` (not part of `...`), optional
/// closing quote, then whitespace.
fn sentence_end_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?:[^.])([.!?])['"]?\s"#).unwrap())
}

pub struct StreamingParser {
    raw_buf: String,
    scan_pos: usize,
    seg_kind: SegmentKind,
    seg_meta: String,
    voice_buf: String,
}

impl Default for StreamingParser {
    fn default() -> Self {
        Self {
            raw_buf: String::new(),
            scan_pos: 0,
            seg_kind: SegmentKind::Narrate,
            seg_meta: String::new(),
            voice_buf: String::new(),
        }
    }
}

impl StreamingParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a raw text delta, returning any segments that became ready.
    pub fn feed(&mut self, raw_delta: &str) -> Vec<Segment> {
        self.raw_buf.push_str(raw_delta);
        self.scan()
    }

    /// Flush any remaining buffered voice text as a final segment.
    pub fn flush(&mut self) -> Vec<Segment> {
        let text = self.voice_buf.trim().to_string();
        self.voice_buf.clear();
        if text.is_empty() {
            Vec::new()
        } else {
            vec![self.make_voice_segment(text)]
        }
    }

    fn make_voice_segment(&self, text: String) -> Segment {
        match self.seg_kind {
            SegmentKind::Npc => Segment::npc(self.seg_meta.clone(), text),
            _ => Segment::narrate(text),
        }
    }

    fn scan(&mut self) -> Vec<Segment> {
        let mut out = Vec::new();
        let mut pos = self.scan_pos;
        let buf = self.raw_buf.clone();
        let buf = buf.as_str();

        loop {
            if pos >= buf.len() {
                break;
            }

            let Some(bracket_rel) = buf[pos..].find('[') else {
                self.voice_buf.push_str(&buf[pos..]);
                pos = buf.len();
                self.check_sentences(&mut out);
                break;
            };
            let bracket = pos + bracket_rel;

            if bracket > pos {
                self.voice_buf.push_str(&buf[pos..bracket]);
                self.check_sentences(&mut out);
            }

            let Some(close_rel) = buf[bracket..].find(']') else {
                pos = bracket;
                break;
            };
            let close = bracket + close_rel;

            let marker_text = &buf[bracket..=close];
            match parse_marker(marker_text) {
                Some((kind, meta)) => {
                    match kind {
                        SegmentKind::Ambient => out.push(Segment::ambient(meta)),
                        SegmentKind::Sfx => out.push(Segment::sfx(meta)),
                        SegmentKind::Narrate | SegmentKind::Npc => {
                            let text = self.voice_buf.trim().to_string();
                            if !text.is_empty() {
                                out.push(self.make_voice_segment(text));
                            }
                            self.voice_buf.clear();
                            self.seg_kind = kind;
                            self.seg_meta = if kind == SegmentKind::Npc { meta } else { String::new() };
                        }
                        SegmentKind::Roll => {
                            let text = self.voice_buf.trim().to_string();
                            if !text.is_empty() {
                                out.push(self.make_voice_segment(text));
                            }
                            self.voice_buf.clear();
                        }
                    }
                    pos = close + 1;
                }
                None => {
                    self.voice_buf.push_str(&buf[bracket..=close]);
                    pos = close + 1;
                    self.check_sentences(&mut out);
                }
            }
        }

        self.scan_pos = pos;
        out
    }

    fn check_sentences(&mut self, out: &mut Vec<Segment>) {
        loop {
            let Some(m) = sentence_end_re().find(&self.voice_buf) else {
                break;
            };
            let end = m.end();
            let sentence = self.voice_buf[..end].trim().to_string();
            self.voice_buf = self.voice_buf[end..].to_string();
            if !sentence.is_empty() {
                out.push(self.make_voice_segment(sentence));
            }
        }
    }
}

/// Parse one `[...]` span into `(kind, payload)`. Returns `None` for
/// unrecognized brackets (treated as literal text by the caller).
fn parse_marker(marker_text: &str) -> Option<(SegmentKind, String)> {
    let inner = marker_text.strip_prefix('[')?.strip_suffix(']')?;
    let (word, payload) = match inner.split_once(':') {
        Some((w, p)) => (w, p.trim().to_string()),
        None => (inner, String::new()),
    };
    let kind = SegmentKind::parse(word)?;
    Some((kind, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentence_completes_within_a_single_feed() {
        let mut parser = StreamingParser::new();
        let segs = parser.feed("The door creaks open. ");
        assert_eq!(segs, vec![Segment::narrate("The door creaks open.")]);
    }

    #[test]
    fn sentence_split_across_feeds_completes_on_second_feed() {
        let mut parser = StreamingParser::new();
        assert!(parser.feed("The door creaks").is_empty());
        let segs = parser.feed(" open. ");
        assert_eq!(segs, vec![Segment::narrate("The door creaks open.")]);
    }

    #[test]
    fn ellipsis_does_not_end_a_sentence() {
        let mut parser = StreamingParser::new();
        let segs = parser.feed("Wait... did you hear that? ");
        assert_eq!(
            segs,
            vec![Segment::narrate("Wait... did you hear that?")]
        );
    }

    #[test]
    fn ambient_marker_fires_immediately_mid_sentence() {
        let mut parser = StreamingParser::new();
        let segs = parser.feed("The fire crackles. [SFX:fire crackling] It's warm.");
        assert_eq!(
            segs,
            vec![
                Segment::narrate("The fire crackles."),
                Segment::sfx("fire crackling"),
            ]
        );
        let rest = parser.flush();
        assert_eq!(rest, vec![Segment::narrate("It's warm.")]);
    }

    #[test]
    fn npc_marker_switches_voice_context() {
        let mut parser = StreamingParser::new();
        let segs = parser.feed("[NPC:Barkeep] What'll it be? ");
        assert_eq!(segs, vec![Segment::npc("Barkeep", "What'll it be?")]);
    }

    #[test]
    fn incomplete_marker_waits_for_more_data() {
        let mut parser = StreamingParser::new();
        assert!(parser.feed("Before. [AMB").is_empty());
        let segs = parser.feed("IENT:wind howling] After.");
        assert_eq!(segs, vec![Segment::narrate("Before."), Segment::ambient("wind howling")]);
    }

    #[test]
    fn piecewise_feed_matches_batch_parse() {
        let text = "[NARRATE] You enter the tavern. [SFX:fire crackling] \
                    [NPC:Barkeep] \"What'll it be, stranger?\"";
        let batch = taleforge_markers::batch_parse(text);

        let mut parser = StreamingParser::new();
        let mut streamed = Vec::new();
        for chunk in text.as_bytes().chunks(7) {
            streamed.extend(parser.feed(std::str::from_utf8(chunk).unwrap()));
        }
        streamed.extend(parser.flush());

        assert_eq!(streamed, batch);
    }
}
