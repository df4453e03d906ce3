//! Video download and merge pipeline.
//!
//! Bilibili serves video and audio as separate DASH streams; both are
//! downloaded to the scratch directory and merged with the system ffmpeg.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use bili_core::{MediaDownload, VideoDownloadRequest, record};

use crate::api::BiliClient;
use crate::error::{ClientError, Result};

/// Fetches the video behind a view record, subject to a duration ceiling.
pub struct VideoFetcher {
    client: BiliClient,
    tmp_dir: PathBuf,
    duration_limit_secs: i64,
}

impl VideoFetcher {
    /// A non-positive `duration_limit_secs` disables the ceiling.
    pub fn new(client: BiliClient, tmp_dir: impl Into<PathBuf>, duration_limit_secs: i64) -> Self {
        Self {
            client,
            tmp_dir: tmp_dir.into(),
            duration_limit_secs,
        }
    }

    async fn fetch(&self, request: &VideoDownloadRequest) -> Result<Option<PathBuf>> {
        if self.duration_limit_secs > 0 && request.duration_secs > self.duration_limit_secs {
            tracing::debug!(
                bvid = %request.bvid,
                duration_secs = request.duration_secs,
                limit_secs = self.duration_limit_secs,
                "video over the duration ceiling, declining"
            );
            return Ok(None);
        }

        let playurl = playurl_query(&request.bvid, request.cid);
        let record = self.client.get_json(&playurl).await?;
        let video_url = record::text_at(&record, "/data/dash/video/0/baseUrl");
        let audio_url = record::text_at(&record, "/data/dash/audio/0/baseUrl");
        if video_url.is_empty() || audio_url.is_empty() {
            return Err(ClientError::ResponseShape(
                "playurl response carries no dash streams".to_string(),
            ));
        }

        tokio::fs::create_dir_all(&self.tmp_dir).await?;
        let video_file = self.tmp_dir.join(format!("{}_v.mp4", request.bvid));
        let audio_file = self.tmp_dir.join(format!("{}_a.mp3", request.bvid));
        let output_file = self.tmp_dir.join(format!("{}.mp4", request.bvid));

        self.download_stream(&video_url, &video_file).await?;
        self.download_stream(&audio_url, &audio_file).await?;
        merge_av(&video_file, &audio_file, &output_file).await?;

        // The part files only matter until the merge lands.
        let _ = tokio::fs::remove_file(&video_file).await;
        let _ = tokio::fs::remove_file(&audio_file).await;

        tracing::info!(bvid = %request.bvid, path = %output_file.display(), "video merged");
        Ok(Some(output_file))
    }

    // Media CDN endpoints enforce the same anti-hotlinking headers as the
    // APIs, so the stream request goes through the client builder.
    async fn download_stream(&self, url: &str, target: &Path) -> Result<()> {
        let response = self.client.api_request(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let mut file = tokio::fs::File::create(target).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl MediaDownload for VideoFetcher {
    async fn download_video(
        &self,
        request: &VideoDownloadRequest,
    ) -> anyhow::Result<Option<PathBuf>> {
        Ok(self.fetch(request).await?)
    }
}

async fn merge_av(video: &Path, audio: &Path, output: &Path) -> Result<()> {
    let status = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(video)
        .arg("-i")
        .arg(audio)
        .args(["-c:v", "copy", "-c:a", "aac"])
        .arg(output)
        .status()
        .await?;
    if !status.success() {
        return Err(ClientError::Io(format!("ffmpeg merge exited with {status}")));
    }
    Ok(())
}

fn playurl_query(bvid: &str, cid: i64) -> String {
    format!("https://api.bilibili.com/x/player/playurl?bvid={bvid}&cid={cid}&qn=80&fnval=16")
}

/// URL form of a local file path, the way chat hosts address attachments.
pub fn file_url(path: &Path) -> String {
    let prefix = if cfg!(target_os = "linux") {
        "file://"
    } else {
        "file:///"
    };
    format!("{prefix}{}", path.display())
}
