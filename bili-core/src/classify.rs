//! Content-reference recognition.
//!
//! A fixed, ordered rule table maps free-form chat text to the Bilibili API
//! query that resolves the referenced content. The first rule that matches
//! anywhere in the text wins; nothing matching means the text is not about
//! Bilibili content at all.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::ContentType;

/// A recognized content reference and the API query that resolves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub content_type: ContentType,
    pub api_url: String,
    /// Article id, carried separately because the article API does not echo
    /// it back in its response.
    pub cvid: Option<String>,
}

struct Rule {
    content_type: ContentType,
    pattern: &'static str,
    url_prefix: &'static str,
    url_suffix: &'static str,
    keep_id: bool,
}

// Order is part of the contract: video ids outrank bangumi ids, and the
// `type=2` dynamic form outranks the plain one.
const RULES: &[Rule] = &[
    Rule {
        content_type: ContentType::Video,
        pattern: r"(?i)(BV[A-Za-z0-9]{10})",
        url_prefix: "https://api.bilibili.com/x/web-interface/view?bvid=",
        url_suffix: "",
        keep_id: false,
    },
    Rule {
        content_type: ContentType::Video,
        pattern: r"(?i)av(\d+)",
        url_prefix: "https://api.bilibili.com/x/web-interface/view?aid=",
        url_suffix: "",
        keep_id: false,
    },
    Rule {
        content_type: ContentType::Bangumi,
        pattern: r"(?i)ep(\d+)",
        url_prefix: "https://api.bilibili.com/pgc/view/web/season?ep_id=",
        url_suffix: "",
        keep_id: false,
    },
    Rule {
        content_type: ContentType::Bangumi,
        pattern: r"(?i)ss(\d+)",
        url_prefix: "https://api.bilibili.com/pgc/view/web/season?season_id=",
        url_suffix: "",
        keep_id: false,
    },
    Rule {
        content_type: ContentType::Bangumi,
        pattern: r"(?i)md(\d+)",
        url_prefix: "https://api.bilibili.com/pgc/review/user?media_id=",
        url_suffix: "",
        keep_id: false,
    },
    Rule {
        content_type: ContentType::Live,
        pattern: r"(?i)live\.bilibili\.com/(?:blanc/|h5/)?(\d+)",
        url_prefix: "https://api.live.bilibili.com/xlive/web-room/v1/index/getInfoByRoom?room_id=",
        url_suffix: "",
        keep_id: false,
    },
    Rule {
        content_type: ContentType::Article,
        pattern: r"(?i)(?:/read/(?:cv|mobile|native)(?:/|\?id=)?|^cv)(\d+)",
        url_prefix: "https://api.bilibili.com/x/article/viewinfo?id=",
        url_suffix: "&mobi_app=pc&from=web",
        keep_id: true,
    },
    Rule {
        content_type: ContentType::Dynamic,
        pattern: r"(?i)(?:t|m)\.bilibili\.com/(\d+)\?.*(?:&|&amp;)type=2",
        url_prefix: "https://api.bilibili.com/x/polymer/web-dynamic/v1/detail?rid=",
        url_suffix: "&type=2",
        keep_id: false,
    },
    Rule {
        content_type: ContentType::Dynamic,
        pattern: r"(?i)(?:t|m)\.bilibili\.com/(?:opus/)?(\d+)",
        url_prefix: "https://api.bilibili.com/x/polymer/web-dynamic/v1/detail?id=",
        url_suffix: "",
        keep_id: false,
    },
];

struct CompiledRule {
    content_type: ContentType,
    regex: Regex,
    url_prefix: &'static str,
    url_suffix: &'static str,
    keep_id: bool,
}

static COMPILED_RULES: LazyLock<Vec<CompiledRule>> = LazyLock::new(|| {
    RULES
        .iter()
        .filter_map(|rule| match Regex::new(rule.pattern) {
            Ok(regex) => Some(CompiledRule {
                content_type: rule.content_type,
                regex,
                url_prefix: rule.url_prefix,
                url_suffix: rule.url_suffix,
                keep_id: rule.keep_id,
            }),
            Err(e) => {
                tracing::error!(
                    pattern = rule.pattern,
                    %e,
                    "skipping recognizer rule that failed to compile"
                );
                None
            }
        })
        .collect()
});

/// Scans `text` for a Bilibili content reference. Total: any input yields
/// either the first rule hit in priority order or `None`.
pub fn classify(text: &str) -> Option<Classification> {
    for rule in COMPILED_RULES.iter() {
        let Some(captures) = rule.regex.captures(text) else {
            continue;
        };
        let Some(id) = captures.get(1) else {
            continue;
        };
        let id = id.as_str();
        let encoded = urlencoding::encode(id);
        return Some(Classification {
            content_type: rule.content_type,
            api_url: format!("{}{}{}", rule.url_prefix, encoded, rule.url_suffix),
            cvid: rule.keep_id.then(|| id.to_string()),
        });
    }
    None
}
