//! Production collaborators for the analysis engine: Bilibili API access,
//! short-link expansion, and video fetching.

mod api;
mod error;
mod media;

pub use api::BiliClient;
pub use error::{ClientError, Result};
pub use media::{VideoFetcher, file_url};
