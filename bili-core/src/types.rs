use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of Bilibili content a message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Video,
    Bangumi,
    Live,
    Article,
    Dynamic,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Video => "video",
            ContentType::Bangumi => "bangumi",
            ContentType::Live => "live",
            ContentType::Article => "article",
            ContentType::Dynamic => "dynamic",
        }
    }
}

/// An inbound group-chat message, as handed over by the host runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMessage {
    pub conversation_id: i64,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// A rendered content summary, ready for a sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub text: String,
    #[serde(default)]
    pub images: Vec<String>,
}
