//! Recognition and dispatch of Bilibili content references in chat text.
//!
//! Pure engine, no HTTP: hosts plug in fetch/resolve/download/delivery
//! collaborators through the `ContentFetch` / `ResolveShortLink` /
//! `MediaDownload` / `ReplySink` traits and feed inbound group messages to
//! the [`Analyzer`].

mod classify;
mod dedup;
mod dispatch;
mod format;
pub mod record;
mod segment;
mod types;

pub use classify::{Classification, classify};
pub use dedup::DedupCache;
pub use dispatch::{
    Analyzer, AnalyzerConfig, ContentFetch, MediaDownload, ReplySink, ResolveShortLink,
    VideoDownloadRequest,
};
pub use format::{ResponseFormatter, abbreviate, resize_image};
pub use segment::{CqCode, Segment, miniapp_url, parse_segments, plain_text};
pub use types::{ContentType, GroupMessage, Reply};
