//! Message dispatch: from inbound group text to delivered replies.
//!
//! The `Analyzer` owns the recognition pipeline and talks to the outside
//! world only through the collaborator traits below, so hosts decide how
//! records are fetched and where replies go.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::classify;
use crate::dedup::DedupCache;
use crate::format::ResponseFormatter;
use crate::record;
use crate::segment;
use crate::types::{ContentType, GroupMessage, Reply};

static SHORT_LINK: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"https?://\S+").ok());

/// Fetches the JSON record behind an API query URL.
#[async_trait]
pub trait ContentFetch: Send + Sync {
    async fn fetch_json(&self, url: &str) -> Result<Value>;
}

/// Expands a shortened share link into its final URL.
#[async_trait]
pub trait ResolveShortLink: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<String>;
}

/// What a video download needs, read from the already-fetched view record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDownloadRequest {
    pub bvid: String,
    pub cid: i64,
    pub duration_secs: i64,
}

/// Downloads the referenced video to a local file. `Ok(None)` means the
/// collaborator declined, e.g. the video is over its duration ceiling.
#[async_trait]
pub trait MediaDownload: Send + Sync {
    async fn download_video(&self, request: &VideoDownloadRequest) -> Result<Option<PathBuf>>;
}

/// Delivery of rendered replies back to a conversation.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send(&self, conversation_id: i64, reply: Reply) -> Result<()>;

    /// Sinks that cannot attach local video files keep the default.
    async fn send_video(&self, _conversation_id: i64, _path: &Path) -> Result<()> {
        Err(anyhow::anyhow!("video replies are not supported by this sink"))
    }
}

/// Plain-value knobs for the dispatcher, resolved by the embedding app.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub enabled: bool,
    pub skip_video_summary: bool,
    pub send_video: bool,
    pub display_image: bool,
    pub images_size: String,
    pub cover_images_size: String,
    pub dedup_window_secs: i64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            skip_video_summary: false,
            send_video: true,
            display_image: true,
            images_size: String::new(),
            cover_images_size: String::new(),
            dedup_window_secs: 3,
        }
    }
}

/// Watches group messages for Bilibili content references and answers with a
/// rendered summary, optionally followed by the video file itself.
pub struct Analyzer {
    config: AnalyzerConfig,
    formatter: ResponseFormatter,
    dedup: DedupCache,
    fetch: Arc<dyn ContentFetch>,
    resolver: Arc<dyn ResolveShortLink>,
    media: Option<Arc<dyn MediaDownload>>,
    sink: Arc<dyn ReplySink>,
}

impl Analyzer {
    pub fn new(
        config: AnalyzerConfig,
        fetch: Arc<dyn ContentFetch>,
        resolver: Arc<dyn ResolveShortLink>,
        media: Option<Arc<dyn MediaDownload>>,
        sink: Arc<dyn ReplySink>,
    ) -> Self {
        let formatter = ResponseFormatter::new(
            config.display_image,
            &config.images_size,
            &config.cover_images_size,
        );
        let dedup = DedupCache::new(config.dedup_window_secs);
        Self {
            config,
            formatter,
            dedup,
            fetch,
            resolver,
            media,
            sink,
        }
    }

    /// Inspects one group message end to end. Infallible by contract:
    /// everything that can go wrong is logged and contained here, so a bad
    /// message can never take the host down.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn on_group_message(&self, message: GroupMessage) {
        if !self.config.enabled {
            return;
        }

        let Some(text) = self.effective_text(&message.text) else {
            return;
        };
        let text = self.expand_short_links(text).await;

        let Some(hit) = classify::classify(&text) else {
            return;
        };
        let age_ms = (chrono::Utc::now() - message.received_at).num_milliseconds();
        tracing::debug!(
            conversation_id = message.conversation_id,
            content_type = hit.content_type.as_str(),
            api_url = %hit.api_url,
            age_ms,
            "recognized content reference"
        );

        if self
            .dedup
            .should_suppress(message.conversation_id, &hit.api_url)
        {
            tracing::debug!(
                conversation_id = message.conversation_id,
                api_url = %hit.api_url,
                "duplicate reference inside the window, ignoring"
            );
            return;
        }

        let record = match self.fetch.fetch_json(&hit.api_url).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(api_url = %hit.api_url, %e, "content fetch failed");
                let reply = Reply {
                    text: format!("bili 解析出错: {e}"),
                    images: Vec::new(),
                };
                self.deliver(message.conversation_id, reply).await;
                return;
            }
        };

        if !(hit.content_type == ContentType::Video && self.config.skip_video_summary) {
            let reply = self
                .formatter
                .render(hit.content_type, &record, hit.cvid.as_deref());
            if !reply.text.is_empty() {
                self.deliver(message.conversation_id, reply).await;
            }
        }

        if hit.content_type == ContentType::Video && self.config.send_video {
            self.fetch_and_send_video(message.conversation_id, &record)
                .await;
        }
    }

    // A QQ mini-program share arrives as a single json CQ code; a message
    // that starts that way either yields its embedded URL or is not for us
    // at all.
    fn effective_text(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if !trimmed.starts_with("[CQ:json") {
            return Some(raw.to_string());
        }
        let segments = segment::parse_segments(trimmed);
        match segment::miniapp_url(&segments) {
            Some(url) => {
                tracing::debug!(%url, "extracted mini-program share link");
                Some(url)
            }
            None => {
                tracing::debug!("mini-program payload without a usable link, ignoring");
                None
            }
        }
    }

    // Share messages often carry a b23.tv short link; the classifier only
    // understands the expanded form, so resolve and substitute first.
    async fn expand_short_links(&self, text: String) -> String {
        let lowered = text.to_lowercase();
        if !lowered.contains("b23.tv") && !lowered.contains("bili23.cn") {
            return text;
        }
        let Some(short) = SHORT_LINK
            .as_ref()
            .and_then(|regex| regex.find(&text))
            .map(|found| found.as_str().to_string())
        else {
            tracing::debug!("short-link marker without a url, skipping expansion");
            return text;
        };
        match self.resolver.resolve(&short).await {
            Ok(expanded) if !expanded.is_empty() => {
                tracing::debug!(%short, %expanded, "expanded short link");
                text.replace(&short, &expanded)
            }
            Ok(_) => text,
            Err(e) => {
                tracing::debug!(%short, %e, "short link expansion failed");
                text
            }
        }
    }

    async fn fetch_and_send_video(&self, conversation_id: i64, record: &Value) {
        let Some(media) = self.media.as_ref() else {
            return;
        };
        let Some(data) = record::node(record, "/data").filter(|value| !value.is_null()) else {
            return;
        };
        let bvid = record::text_at(data, "/bvid");
        if bvid.is_empty() {
            return;
        }
        let request = VideoDownloadRequest {
            bvid,
            cid: record::int_at(data, "/cid"),
            duration_secs: record::int_at(data, "/duration"),
        };
        let path = match media.download_video(&request).await {
            Ok(Some(path)) => path,
            Ok(None) => {
                tracing::debug!(
                    bvid = %request.bvid,
                    duration_secs = request.duration_secs,
                    "video declined by the download collaborator"
                );
                return;
            }
            Err(e) => {
                tracing::error!(bvid = %request.bvid, %e, "video download failed");
                return;
            }
        };
        tracing::info!(bvid = %request.bvid, path = %path.display(), "video downloaded, sending");
        if let Err(e) = self.sink.send_video(conversation_id, &path).await {
            tracing::error!(conversation_id, %e, "video delivery failed");
        }
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(path = %path.display(), %e, "failed to remove temp video file");
        }
    }

    async fn deliver(&self, conversation_id: i64, reply: Reply) {
        if let Err(e) = self.sink.send(conversation_id, reply).await {
            tracing::error!(conversation_id, %e, "reply delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;

    struct StubFetch {
        record: Value,
        calls: Mutex<Vec<String>>,
    }

    impl StubFetch {
        fn new(record: Value) -> Arc<Self> {
            Arc::new(Self {
                record,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("fetch calls lock").clone()
        }
    }

    #[async_trait]
    impl ContentFetch for StubFetch {
        async fn fetch_json(&self, url: &str) -> Result<Value> {
            self.calls
                .lock()
                .expect("fetch calls lock")
                .push(url.to_string());
            Ok(self.record.clone())
        }
    }

    struct FailingFetch;

    #[async_trait]
    impl ContentFetch for FailingFetch {
        async fn fetch_json(&self, _url: &str) -> Result<Value> {
            Err(anyhow::anyhow!("connection reset"))
        }
    }

    struct StubResolver {
        expanded: String,
        calls: Mutex<Vec<String>>,
    }

    impl StubResolver {
        fn new(expanded: &str) -> Arc<Self> {
            Arc::new(Self {
                expanded: expanded.to_string(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("resolver calls lock").clone()
        }
    }

    #[async_trait]
    impl ResolveShortLink for StubResolver {
        async fn resolve(&self, url: &str) -> Result<String> {
            self.calls
                .lock()
                .expect("resolver calls lock")
                .push(url.to_string());
            if self.expanded.is_empty() {
                return Err(anyhow::anyhow!("resolver offline"));
            }
            Ok(self.expanded.clone())
        }
    }

    struct StubMedia {
        path: Option<PathBuf>,
        requests: Mutex<Vec<VideoDownloadRequest>>,
    }

    impl StubMedia {
        fn new(path: Option<PathBuf>) -> Arc<Self> {
            Arc::new(Self {
                path,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<VideoDownloadRequest> {
            self.requests.lock().expect("media requests lock").clone()
        }
    }

    #[async_trait]
    impl MediaDownload for StubMedia {
        async fn download_video(&self, request: &VideoDownloadRequest) -> Result<Option<PathBuf>> {
            self.requests
                .lock()
                .expect("media requests lock")
                .push(request.clone());
            Ok(self.path.clone())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        replies: Mutex<Vec<(i64, Reply)>>,
        videos: Mutex<Vec<(i64, PathBuf)>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn replies(&self) -> Vec<(i64, Reply)> {
            self.replies.lock().expect("sink replies lock").clone()
        }

        fn videos(&self) -> Vec<(i64, PathBuf)> {
            self.videos.lock().expect("sink videos lock").clone()
        }
    }

    #[async_trait]
    impl ReplySink for RecordingSink {
        async fn send(&self, conversation_id: i64, reply: Reply) -> Result<()> {
            self.replies
                .lock()
                .expect("sink replies lock")
                .push((conversation_id, reply));
            Ok(())
        }

        async fn send_video(&self, conversation_id: i64, path: &Path) -> Result<()> {
            self.videos
                .lock()
                .expect("sink videos lock")
                .push((conversation_id, path.to_path_buf()));
            Ok(())
        }
    }

    fn message(text: &str) -> GroupMessage {
        GroupMessage {
            conversation_id: 42,
            text: text.to_string(),
            received_at: Utc::now(),
        }
    }

    fn video_record() -> Value {
        serde_json::json!({
            "data": {
                "title": "T",
                "aid": 5,
                "bvid": "BV1xx411c7mD",
                "cid": 1176840,
                "duration": 213
            }
        })
    }

    fn text_config() -> AnalyzerConfig {
        AnalyzerConfig {
            send_video: false,
            ..AnalyzerConfig::default()
        }
    }

    fn analyzer(
        config: AnalyzerConfig,
        fetch: Arc<StubFetch>,
        resolver: Arc<StubResolver>,
        media: Option<Arc<StubMedia>>,
        sink: Arc<RecordingSink>,
    ) -> Analyzer {
        Analyzer::new(
            config,
            fetch,
            resolver,
            media.map(|m| m as Arc<dyn MediaDownload>),
            sink,
        )
    }

    #[tokio::test]
    async fn classifies_fetches_and_sends_a_summary() {
        let fetch = StubFetch::new(video_record());
        let resolver = StubResolver::new("");
        let sink = RecordingSink::new();
        let analyzer = analyzer(
            text_config(),
            fetch.clone(),
            resolver.clone(),
            None,
            sink.clone(),
        );

        analyzer
            .on_group_message(message("看看 https://www.bilibili.com/video/BV1xx411c7mD"))
            .await;

        assert_eq!(
            fetch.calls(),
            vec!["https://api.bilibili.com/x/web-interface/view?bvid=BV1xx411c7mD"]
        );
        let replies = sink.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, 42);
        assert_eq!(
            replies[0].1.text,
            "标题：T\n链接：https://www.bilibili.com/video/av5\n"
        );
        assert!(resolver.calls().is_empty());
    }

    #[tokio::test]
    async fn ignores_text_without_references() {
        let fetch = StubFetch::new(video_record());
        let sink = RecordingSink::new();
        let analyzer = analyzer(
            text_config(),
            fetch.clone(),
            StubResolver::new(""),
            None,
            sink.clone(),
        );

        analyzer.on_group_message(message("今天吃什么")).await;

        assert!(fetch.calls().is_empty());
        assert!(sink.replies().is_empty());
    }

    #[tokio::test]
    async fn disabled_analyzer_does_nothing() {
        let fetch = StubFetch::new(video_record());
        let sink = RecordingSink::new();
        let config = AnalyzerConfig {
            enabled: false,
            ..text_config()
        };
        let analyzer = analyzer(config, fetch.clone(), StubResolver::new(""), None, sink.clone());

        analyzer.on_group_message(message("av170001")).await;

        assert!(fetch.calls().is_empty());
        assert!(sink.replies().is_empty());
    }

    #[tokio::test]
    async fn duplicate_references_are_suppressed_within_the_window() {
        let fetch = StubFetch::new(video_record());
        let sink = RecordingSink::new();
        let analyzer = analyzer(
            text_config(),
            fetch.clone(),
            StubResolver::new(""),
            None,
            sink.clone(),
        );

        analyzer.on_group_message(message("av170001")).await;
        analyzer.on_group_message(message("又来 av170001")).await;

        assert_eq!(fetch.calls().len(), 1);
        assert_eq!(sink.replies().len(), 1);
    }

    #[tokio::test]
    async fn fetch_failures_become_a_short_error_reply() {
        let sink = RecordingSink::new();
        let analyzer = Analyzer::new(
            text_config(),
            Arc::new(FailingFetch),
            StubResolver::new(""),
            None,
            sink.clone(),
        );

        analyzer.on_group_message(message("av170001")).await;

        let replies = sink.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].1.text, "bili 解析出错: connection reset");
    }

    #[tokio::test]
    async fn miniapp_messages_use_the_embedded_link() {
        let fetch = StubFetch::new(video_record());
        let sink = RecordingSink::new();
        let analyzer = analyzer(
            text_config(),
            fetch.clone(),
            StubResolver::new(""),
            None,
            sink.clone(),
        );

        let wire = r#"[CQ:json,data={"meta":{"detail_1":{"qqdocurl":"https://www.bilibili.com/video/BV1xx411c7mD?share_medium=android"}}}]"#;
        analyzer.on_group_message(message(wire)).await;

        assert_eq!(
            fetch.calls(),
            vec!["https://api.bilibili.com/x/web-interface/view?bvid=BV1xx411c7mD"]
        );
    }

    #[tokio::test]
    async fn broken_miniapp_payloads_never_fall_through_to_plain_text() {
        let fetch = StubFetch::new(video_record());
        let sink = RecordingSink::new();
        let analyzer = analyzer(
            text_config(),
            fetch.clone(),
            StubResolver::new(""),
            None,
            sink.clone(),
        );

        // The trailing av reference must not rescue a broken mini-program.
        analyzer
            .on_group_message(message("[CQ:json,data=broken] av170001"))
            .await;

        assert!(fetch.calls().is_empty());
        assert!(sink.replies().is_empty());
    }

    #[tokio::test]
    async fn short_links_are_expanded_before_classification() {
        let fetch = StubFetch::new(video_record());
        let resolver = StubResolver::new("https://www.bilibili.com/video/BV1xx411c7mD");
        let sink = RecordingSink::new();
        let analyzer = analyzer(
            text_config(),
            fetch.clone(),
            resolver.clone(),
            None,
            sink.clone(),
        );

        analyzer
            .on_group_message(message("看 https://b23.tv/abcDEF 哈哈"))
            .await;

        assert_eq!(resolver.calls(), vec!["https://b23.tv/abcDEF"]);
        assert_eq!(
            fetch.calls(),
            vec!["https://api.bilibili.com/x/web-interface/view?bvid=BV1xx411c7mD"]
        );
    }

    #[tokio::test]
    async fn resolver_failures_fall_back_to_the_raw_text() {
        let fetch = StubFetch::new(video_record());
        let resolver = StubResolver::new("");
        let sink = RecordingSink::new();
        let analyzer = analyzer(
            text_config(),
            fetch.clone(),
            resolver.clone(),
            None,
            sink.clone(),
        );

        analyzer
            .on_group_message(message("https://b23.tv/abc 另见 av170001"))
            .await;

        assert_eq!(resolver.calls().len(), 1);
        assert_eq!(
            fetch.calls(),
            vec!["https://api.bilibili.com/x/web-interface/view?aid=170001"]
        );
    }

    #[tokio::test]
    async fn video_download_uses_fields_from_the_fetched_record() {
        let downloaded =
            std::env::temp_dir().join(format!("bili-dispatch-test-{}.mp4", std::process::id()));
        std::fs::write(&downloaded, b"fake video").expect("write temp video");

        let fetch = StubFetch::new(video_record());
        let media = StubMedia::new(Some(downloaded.clone()));
        let sink = RecordingSink::new();
        let config = AnalyzerConfig {
            skip_video_summary: true,
            ..AnalyzerConfig::default()
        };
        let analyzer = analyzer(
            config,
            fetch.clone(),
            StubResolver::new(""),
            Some(media.clone()),
            sink.clone(),
        );

        analyzer.on_group_message(message("av170001")).await;

        // Summary suppressed, video still handled.
        assert!(sink.replies().is_empty());
        assert_eq!(
            media.requests(),
            vec![VideoDownloadRequest {
                bvid: "BV1xx411c7mD".to_string(),
                cid: 1176840,
                duration_secs: 213,
            }]
        );
        let videos = sink.videos();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].1, downloaded);
        assert!(!downloaded.exists(), "temp video should be removed after delivery");
    }

    #[tokio::test]
    async fn declined_downloads_send_no_video() {
        let fetch = StubFetch::new(video_record());
        let media = StubMedia::new(None);
        let sink = RecordingSink::new();
        let analyzer = analyzer(
            AnalyzerConfig::default(),
            fetch.clone(),
            StubResolver::new(""),
            Some(media.clone()),
            sink.clone(),
        );

        analyzer.on_group_message(message("av170001")).await;

        assert_eq!(media.requests().len(), 1);
        assert!(sink.videos().is_empty());
        assert_eq!(sink.replies().len(), 1);
    }

    #[tokio::test]
    async fn records_without_a_bvid_are_not_downloaded() {
        let fetch = StubFetch::new(serde_json::json!({"data": {"title": "T", "aid": 5}}));
        let media = StubMedia::new(None);
        let sink = RecordingSink::new();
        let analyzer = analyzer(
            AnalyzerConfig::default(),
            fetch.clone(),
            StubResolver::new(""),
            Some(media.clone()),
            sink.clone(),
        );

        analyzer.on_group_message(message("av170001")).await;

        assert!(media.requests().is_empty());
    }

    #[tokio::test]
    async fn send_video_off_skips_the_collaborator() {
        let fetch = StubFetch::new(video_record());
        let media = StubMedia::new(None);
        let sink = RecordingSink::new();
        let analyzer = analyzer(
            text_config(),
            fetch.clone(),
            StubResolver::new(""),
            Some(media.clone()),
            sink.clone(),
        );

        analyzer.on_group_message(message("av170001")).await;

        assert!(media.requests().is_empty());
        assert_eq!(sink.replies().len(), 1);
    }

    #[tokio::test]
    async fn sink_default_rejects_video_delivery() {
        struct TextOnlySink;

        #[async_trait]
        impl ReplySink for TextOnlySink {
            async fn send(&self, _conversation_id: i64, _reply: Reply) -> Result<()> {
                Ok(())
            }
        }

        let err = TextOnlySink
            .send_video(1, Path::new("/tmp/x.mp4"))
            .await
            .expect_err("default sink should reject videos");
        assert!(err.to_string().contains("not supported"));
    }
}
