//! Parsing of the `[CQ:...]` message mini-language.
//!
//! Chat text arrives as plain runs interleaved with `[CQ:kind,key=value,...]`
//! codes. Values inside a code escape the four reserved characters; parsing
//! decodes them and `Display` re-encodes, so rendering parsed segments back
//! reproduces the original wire text.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static CQ_SCAN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[CQ:([a-zA-Z0-9_.-]+)((?:,.*?)*?)\]").ok());

/// One run of a message: plain text or a CQ code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Cq(CqCode),
}

/// A `[CQ:kind,key=value,...]` code with fields in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CqCode {
    pub kind: String,
    pub fields: Vec<(String, String)>,
}

impl CqCode {
    /// Value of the first field named `key`, already unescaped.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Display for CqCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[CQ:{}", self.kind)?;
        for (key, value) in &self.fields {
            write!(f, ",{}={}", key, encode_field(value))?;
        }
        f.write_str("]")
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Text(text) => f.write_str(text),
            Segment::Cq(code) => code.fmt(f),
        }
    }
}

/// Splits a raw message into text runs and CQ codes. Empty input yields no
/// segments; input without codes yields a single text run.
pub fn parse_segments(text: &str) -> Vec<Segment> {
    if text.is_empty() {
        return Vec::new();
    }
    let Some(scan) = CQ_SCAN.as_ref() else {
        return vec![Segment::Text(text.to_string())];
    };

    let mut segments = Vec::new();
    let mut cursor = 0;
    for captures in scan.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        if whole.start() > cursor {
            segments.push(Segment::Text(text[cursor..whole.start()].to_string()));
        }
        let kind = captures
            .get(1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let raw_fields = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
        segments.push(Segment::Cq(CqCode {
            kind,
            fields: parse_fields(raw_fields),
        }));
        cursor = whole.end();
    }
    if cursor < text.len() {
        segments.push(Segment::Text(text[cursor..].to_string()));
    }
    segments
}

/// Flattens segments to display text: `at` codes with a `qq` field become
/// `@<qq> `, images and faces become placeholder markers, other codes
/// disappear. Trimmed.
pub fn plain_text(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Cq(code) => match code.kind.as_str() {
                "at" => {
                    if let Some(qq) = code.field("qq") {
                        out.push('@');
                        out.push_str(qq);
                        out.push(' ');
                    }
                }
                "image" => out.push_str("[图片]"),
                "face" => out.push_str("[表情]"),
                _ => {}
            },
        }
    }
    out.trim().to_string()
}

/// Shared-card URL out of a QQ mini-program message: exactly one `json`
/// segment whose `data` field holds a JSON document with a non-empty
/// `meta.detail_1.qqdocurl`. Any deviation yields `None`.
pub fn miniapp_url(segments: &[Segment]) -> Option<String> {
    let [Segment::Cq(code)] = segments else {
        return None;
    };
    if code.kind != "json" {
        return None;
    }
    let payload: Value = serde_json::from_str(code.field("data")?).ok()?;
    let url = payload.pointer("/meta/detail_1/qqdocurl")?.as_str()?;
    if url.is_empty() {
        return None;
    }
    Some(url.to_string())
}

fn parse_fields(raw: &str) -> Vec<(String, String)> {
    let Some(raw) = raw.strip_prefix(',') else {
        return Vec::new();
    };
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.to_string(), decode_field(value)))
        .collect()
}

// Decode order matters: `&amp;` first, so doubly escaped input degrades the
// same way the reference clients do.
fn decode_field(raw: &str) -> String {
    raw.replace("&amp;", "&")
        .replace("&#44;", ",")
        .replace("&#91;", "[")
        .replace("&#93;", "]")
}

fn encode_field(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace(',', "&#44;")
        .replace('[', "&#91;")
        .replace(']', "&#93;")
}

#[cfg(test)]
mod tests {
    use super::{CqCode, Segment, miniapp_url, parse_segments, plain_text};

    #[test]
    fn empty_input_yields_no_segments() {
        assert!(parse_segments("").is_empty());
    }

    #[test]
    fn text_without_codes_is_a_single_run() {
        assert_eq!(
            parse_segments("看这个 av170001"),
            vec![Segment::Text("看这个 av170001".to_string())]
        );
    }

    #[test]
    fn codes_split_the_surrounding_text() {
        let segments = parse_segments("前[CQ:at,qq=123]后");
        assert_eq!(
            segments,
            vec![
                Segment::Text("前".to_string()),
                Segment::Cq(CqCode {
                    kind: "at".to_string(),
                    fields: vec![("qq".to_string(), "123".to_string())],
                }),
                Segment::Text("后".to_string()),
            ]
        );
    }

    #[test]
    fn field_values_are_unescaped() {
        let segments = parse_segments("[CQ:image,file=a&#44;b&#91;1&#93;&amp;c.jpg]");
        let Segment::Cq(code) = &segments[0] else {
            panic!("expected a cq code");
        };
        assert_eq!(code.field("file"), Some("a,b[1]&c.jpg"));
    }

    #[test]
    fn double_escaped_comma_decodes_all_the_way() {
        let segments = parse_segments("[CQ:x,v=&amp;#44;]");
        let Segment::Cq(code) = &segments[0] else {
            panic!("expected a cq code");
        };
        assert_eq!(code.field("v"), Some(","));
    }

    #[test]
    fn fields_without_a_value_are_dropped() {
        let segments = parse_segments("[CQ:image,file=a.jpg,cache]");
        let Segment::Cq(code) = &segments[0] else {
            panic!("expected a cq code");
        };
        assert_eq!(code.fields.len(), 1);
        assert_eq!(code.field("file"), Some("a.jpg"));
        assert_eq!(code.field("cache"), None);
    }

    #[test]
    fn rendering_segments_reproduces_the_wire_text() {
        let wire = "前[CQ:at,qq=123]中[CQ:image,file=a&#44;b.jpg]后";
        let rendered: String = parse_segments(wire)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(rendered, wire);
    }

    #[test]
    fn plain_text_substitutes_markers_and_trims() {
        let segments = parse_segments(" [CQ:at,qq=42]看 [CQ:image,file=x.jpg][CQ:face,id=1] ");
        assert_eq!(plain_text(&segments), "@42 看 [图片][表情]");
    }

    #[test]
    fn plain_text_drops_unknown_codes() {
        let segments = parse_segments("a[CQ:record,file=v.amr]b");
        assert_eq!(plain_text(&segments), "ab");
    }

    #[test]
    fn plain_text_skips_at_codes_without_a_target() {
        let segments = parse_segments("a[CQ:at]b");
        assert_eq!(plain_text(&segments), "ab");
    }

    #[test]
    fn miniapp_url_reads_the_shared_card_link() {
        let wire = r#"[CQ:json,data={"app":"com.tencent.miniapp_01"&#44;"meta":{"detail_1":{"qqdocurl":"https://b23.tv/ABCdef?share_medium=android"}}}]"#;
        let segments = parse_segments(wire);
        assert_eq!(
            miniapp_url(&segments).as_deref(),
            Some("https://b23.tv/ABCdef?share_medium=android")
        );
    }

    #[test]
    fn miniapp_url_rejects_structural_deviations() {
        // More than one segment.
        let two = parse_segments("x[CQ:json,data={}]");
        assert_eq!(miniapp_url(&two), None);
        // Wrong kind.
        let image = parse_segments("[CQ:image,file=a.jpg]");
        assert_eq!(miniapp_url(&image), None);
        // data is not JSON.
        let broken = parse_segments("[CQ:json,data=not json]");
        assert_eq!(miniapp_url(&broken), None);
        // No qqdocurl in the payload.
        let missing = parse_segments(r#"[CQ:json,data={"meta":{"detail_1":{}}}]"#);
        assert_eq!(miniapp_url(&missing), None);
        // Empty qqdocurl.
        let empty = parse_segments(r#"[CQ:json,data={"meta":{"detail_1":{"qqdocurl":""}}}]"#);
        assert_eq!(miniapp_url(&empty), None);
        // No data field at all.
        let bare = parse_segments("[CQ:json]");
        assert_eq!(miniapp_url(&bare), None);
    }
}
