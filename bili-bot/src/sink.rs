//! Console delivery for one-shot runs.

use async_trait::async_trait;
use bili_core::{Reply, ReplySink};
use std::path::Path;

/// Prints replies to stdout instead of a chat transport. The host bot swaps
/// in its own [`ReplySink`] when embedding the analyzer.
pub struct ConsoleSink;

#[async_trait]
impl ReplySink for ConsoleSink {
    async fn send(&self, conversation_id: i64, reply: Reply) -> anyhow::Result<()> {
        println!("[group {conversation_id}]");
        print!("{}", reply.text);
        if !reply.text.ends_with('\n') {
            println!();
        }
        for image in &reply.images {
            println!("image: {image}");
        }
        Ok(())
    }

    async fn send_video(&self, conversation_id: i64, path: &Path) -> anyhow::Result<()> {
        println!("[group {conversation_id}] video: {}", bili_client::file_url(path));
        Ok(())
    }
}
