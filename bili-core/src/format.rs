//! Rendering of fetched content records into reply text.
//!
//! The output layout (field labels, separators, link templates, fallback
//! strings) is a compatibility surface: downstream chat clients and the
//! people reading them expect these exact shapes, so changes here are
//! breaking even when they look cosmetic.

use serde_json::Value;

use crate::record::{int_at, node, text_at};
use crate::types::{ContentType, Reply};

/// Renders a fetched record for one content type into reply text plus
/// optional image URLs. Total: malformed records fall back to short
/// user-readable strings, never errors.
#[derive(Debug, Clone)]
pub struct ResponseFormatter {
    display_image: bool,
    images_size: String,
    cover_size: String,
}

impl ResponseFormatter {
    pub fn new(display_image: bool, images_size: &str, cover_size: &str) -> Self {
        Self {
            display_image,
            images_size: images_size.to_string(),
            cover_size: cover_size.to_string(),
        }
    }

    pub fn render(&self, content_type: ContentType, record: &Value, cvid: Option<&str>) -> Reply {
        match content_type {
            ContentType::Video => self.render_video(record),
            ContentType::Bangumi => self.render_bangumi(record),
            ContentType::Live => self.render_live(record),
            ContentType::Article => self.render_article(record, cvid),
            ContentType::Dynamic => self.render_dynamic(record),
        }
    }

    fn render_video(&self, record: &Value) -> Reply {
        // Deleted or hidden videos come back with a null `data`.
        let Some(data) = node(record, "/data").filter(|value| !value.is_null()) else {
            return text_only("无法获取视频信息（可能已被删除或不可见）");
        };
        let mut text = format!("标题：{}\n", text_at(data, "/title"));
        text.push_str(&format!(
            "链接：https://www.bilibili.com/video/av{}\n",
            int_at(data, "/aid")
        ));
        if node(data, "/stat").is_some() {
            text.push_str(&format!(
                "播放：{} | 弹幕：{} | 点赞：{}\n",
                abbreviate(int_at(data, "/stat/view")),
                abbreviate(int_at(data, "/stat/danmaku")),
                abbreviate(int_at(data, "/stat/like")),
            ));
        }
        let desc = text_at(data, "/desc");
        if !desc.is_empty() {
            append_desc(&mut text, &desc);
        }
        let mut reply = Reply {
            text,
            images: Vec::new(),
        };
        self.push_image(&mut reply, &text_at(data, "/pic"));
        reply
    }

    fn render_bangumi(&self, record: &Value) -> Reply {
        let Some(result) = node(record, "/result") else {
            return text_only("无法获取番剧信息");
        };
        let mut text = format!("番剧：{}\n", text_at(result, "/title"));
        match node(result, "/media_id") {
            Some(_) => text.push_str(&format!(
                "链接：https://www.bilibili.com/bangumi/media/md{}\n",
                text_at(result, "/media_id")
            )),
            None => text.push_str("链接：https://www.bilibili.com/\n"),
        }
        let evaluate = text_at(result, "/evaluate");
        if !evaluate.is_empty() {
            text.push_str(&format!("简介：{evaluate}\n"));
        }
        let mut reply = Reply {
            text,
            images: Vec::new(),
        };
        self.push_image(&mut reply, &text_at(result, "/cover"));
        reply
    }

    fn render_live(&self, record: &Value) -> Reply {
        let Some(data) = node(record, "/data") else {
            return text_only("无法获取直播间信息");
        };
        let mut text = format!("直播：{}\n", text_at(data, "/room_info/title"));
        text.push_str(&format!(
            "主播：{} | 人气：{}\n",
            text_at(data, "/anchor_info/base_info/uname"),
            abbreviate(int_at(data, "/room_info/online")),
        ));
        text.push_str(&format!(
            "链接：https://live.bilibili.com/{}\n",
            text_at(data, "/room_info/room_id")
        ));
        let mut reply = Reply {
            text,
            images: Vec::new(),
        };
        self.push_image(&mut reply, &text_at(data, "/room_info/cover"));
        reply
    }

    fn render_article(&self, record: &Value, cvid: Option<&str>) -> Reply {
        let Some(data) = node(record, "/data") else {
            return text_only("无法获取专栏信息");
        };
        let mut text = format!("标题：{}\n", text_at(data, "/title"));
        text.push_str(&format!("作者：{}\n", text_at(data, "/author_name")));
        text.push_str(&format!(
            "阅读：{}\n",
            abbreviate(int_at(data, "/stats/view"))
        ));
        // The article API does not echo the id, so the link needs the one the
        // classifier extracted.
        if let Some(cvid) = cvid {
            text.push_str(&format!("链接：https://www.bilibili.com/read/cv{cvid}\n"));
        }
        let mut reply = Reply {
            text,
            images: Vec::new(),
        };
        self.push_image(&mut reply, &text_at(data, "/cover"));
        reply
    }

    fn render_dynamic(&self, record: &Value) -> Reply {
        let Some(item) = node(record, "/data/item").or_else(|| node(record, "/data")) else {
            return text_only("无法获取动态信息");
        };
        let major = "/modules/module_dynamic/major";
        let tag = text_at(item, &format!("{major}/type"));
        let dynamic_id = text_at(item, "/id_str");

        if tag == "MAJOR_TYPE_DRAW" {
            let mut reply = text_only(format!("动态\n链接：https://t.bilibili.com/{dynamic_id}\n"));
            if let Some(items) = node(item, &format!("{major}/draw/items")).and_then(Value::as_array)
            {
                for entry in items {
                    self.push_image(&mut reply, &text_at(entry, "/src"));
                }
            }
            return reply;
        }

        if tag == "MAJOR_TYPE_ARTICLE" {
            let article = format!("{major}/article");
            let mut text = format!("标题：{}\n", text_at(item, &format!("{article}/title")));
            text.push_str(&format!(
                "动态：{}...\n",
                text_at(item, &format!("{article}/desc"))
            ));
            text.push_str(&format!("链接：https://t.bilibili.com/{dynamic_id}\n"));
            // Whatever the API sent, e.g. "1.2万阅读"; passed through verbatim.
            text.push_str(&format!(
                "阅读量：{}\n",
                text_at(item, &format!("{article}/label"))
            ));
            let mut reply = text_only(text);
            if let Some(covers) = node(item, &format!("{article}/covers")).and_then(Value::as_array)
            {
                for cover in covers {
                    self.push_image(&mut reply, cover.as_str().unwrap_or_default());
                }
            }
            return reply;
        }

        text_only(format!("暂不支持解析该类型动态：{tag}"))
    }

    fn push_image(&self, reply: &mut Reply, src: &str) {
        if !self.display_image || src.is_empty() {
            return;
        }
        reply
            .images
            .push(resize_image(src, &self.images_size, &self.cover_size, true));
    }
}

fn text_only(text: impl Into<String>) -> Reply {
    Reply {
        text: text.into(),
        images: Vec::new(),
    }
}

// Video descriptions can run long; only the first three lines survive, each
// followed by a single space, with a trailing ellipsis when more were cut.
// Trailing empty lines do not count.
fn append_desc(text: &mut String, desc: &str) {
    let mut lines: Vec<&str> = desc.split('\n').collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    text.push_str("简介：");
    for line in lines.iter().take(3) {
        text.push_str(line);
        text.push(' ');
    }
    if lines.len() > 3 {
        text.push_str("……");
    }
    text.push('\n');
}

/// Compacts large counts the way the Bilibili web UI does: 15000 becomes
/// "1.50万", anything at or below 10000 stays a plain integer.
pub fn abbreviate(count: i64) -> String {
    if count > 10000 {
        format!("{:.2}万", count as f64 / 10000.0)
    } else {
        count.to_string()
    }
}

/// Appends an image-CDN size suffix, `{src}@{size}.{ext}`. Covers prefer the
/// cover size and fall back to the general one; no configured size leaves the
/// URL untouched.
pub fn resize_image(src: &str, images_size: &str, cover_size: &str, is_cover: bool) -> String {
    if src.is_empty() {
        return src.to_string();
    }
    let size = if is_cover && !cover_size.is_empty() {
        cover_size
    } else if !images_size.is_empty() {
        images_size
    } else {
        return src.to_string();
    };
    format!("{src}@{size}.{}", pseudo_extension(src))
}

// The "extension" is literally the last three characters of the source URL,
// whatever they happen to be. Sources shorter than three characters get none.
fn pseudo_extension(src: &str) -> String {
    let chars: Vec<char> = src.chars().collect();
    if chars.len() < 3 {
        return String::new();
    }
    chars[chars.len() - 3..].iter().collect()
}
