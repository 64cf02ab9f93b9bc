//! Echo chat handler
//!
//! Streams the user's message back one word at a time. `/download <name>`
//! offers a previously uploaded file back to the client instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::debug;

use parley_common::StatusNotice;

use super::{ChatContext, ChatHandler, ChatStream, CollaboratorError, FileStore};

const DOWNLOAD_COMMAND: &str = "/download";

pub struct EchoChatHandler {
    files: Arc<dyn FileStore>,
    word_delay: Duration,
}

impl EchoChatHandler {
    pub fn new(files: Arc<dyn FileStore>) -> Self {
        Self {
            files,
            word_delay: Duration::ZERO,
        }
    }

    /// Pause between streamed words
    pub fn with_word_delay(mut self, delay: Duration) -> Self {
        self.word_delay = delay;
        self
    }

    async fn offer(&self, ctx: &ChatContext, name: &str) -> String {
        ctx.status.emit(StatusNotice::ToolCall {
            tool: "download".to_string(),
        });
        let data = match self.files.load(name).await {
            Ok(data) => data,
            Err(e) => return format!("Cannot offer {}: {}", name, e),
        };
        let size = data.len();
        match ctx.offer(name, data).await {
            Ok(()) => format!("Offering {} ({} bytes)", name, size),
            Err(e) => format!("Cannot offer {}: {}", name, e),
        }
    }
}

#[async_trait]
impl ChatHandler for EchoChatHandler {
    async fn handle(&self, ctx: ChatContext, text: String) -> Result<ChatStream, CollaboratorError> {
        ctx.status.emit(StatusNotice::Thinking { detail: None });

        if let Some(rest) = text.trim().strip_prefix(DOWNLOAD_COMMAND) {
            let name = rest.trim();
            if !name.is_empty() {
                let reply = self.offer(&ctx, name).await;
                ctx.status.emit(StatusNotice::StreamStart);
                return Ok(stream::once(async move { Ok::<_, CollaboratorError>(reply) }).boxed());
            }
        }

        debug!(session = %ctx.session_id, model = %ctx.model, "Echoing chat message");
        ctx.status.emit(StatusNotice::Generating);
        ctx.status.emit(StatusNotice::StreamStart);

        let words: Vec<String> = text
            .split_inclusive(char::is_whitespace)
            .map(str::to_string)
            .collect();
        let delay = self.word_delay;
        Ok(stream::iter(words)
            .then(move |word| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, CollaboratorError>(word)
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{DownloadSink, StatusSink};
    use bytes::Bytes;
    use parking_lot::Mutex;
    use parley_common::SessionId;

    struct FixedStore;

    #[async_trait]
    impl FileStore for FixedStore {
        async fn store(
            &self,
            _session: SessionId,
            _filename: &str,
            _data: Bytes,
        ) -> Result<crate::collaborators::StoredFile, CollaboratorError> {
            Err(CollaboratorError::Failed("read-only".into()))
        }

        async fn load(&self, filename: &str) -> Result<Bytes, CollaboratorError> {
            match filename {
                "report.txt" => Ok(Bytes::from_static(b"quarterly numbers")),
                other => Err(CollaboratorError::FileNotFound(other.to_string())),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<(String, usize)>>);

    #[async_trait]
    impl DownloadSink for RecordingSink {
        async fn offer(&self, _session: SessionId, filename: String, data: Bytes) -> Result<(), CollaboratorError> {
            self.0.lock().push((filename, data.len()));
            Ok(())
        }
    }

    fn context(sink: Arc<RecordingSink>, notices: Arc<Mutex<Vec<StatusNotice>>>) -> ChatContext {
        ChatContext::new(
            SessionId::new(),
            SessionId::new(),
            "echo-small".into(),
            StatusSink::new(move |n| notices.lock().push(n)),
            sink,
        )
    }

    #[tokio::test]
    async fn test_echo_streams_words() {
        let handler = EchoChatHandler::new(Arc::new(FixedStore));
        let notices = Arc::new(Mutex::new(Vec::new()));
        let ctx = context(Arc::new(RecordingSink::default()), notices.clone());

        let chunks: Vec<String> = handler
            .handle(ctx, "hello big world".into())
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks, vec!["hello ", "big ", "world"]);
        assert!(notices.lock().contains(&StatusNotice::StreamStart));
    }

    #[tokio::test]
    async fn test_download_command_offers_file() {
        let handler = EchoChatHandler::new(Arc::new(FixedStore));
        let sink = Arc::new(RecordingSink::default());
        let ctx = context(sink.clone(), Arc::new(Mutex::new(Vec::new())));

        let reply: Vec<String> = handler
            .handle(ctx, "/download report.txt".into())
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(reply, vec!["Offering report.txt (17 bytes)"]);
        assert_eq!(sink.0.lock().as_slice(), &[("report.txt".to_string(), 17)]);
    }

    #[tokio::test]
    async fn test_download_of_missing_file_is_reported() {
        let handler = EchoChatHandler::new(Arc::new(FixedStore));
        let sink = Arc::new(RecordingSink::default());
        let ctx = context(sink.clone(), Arc::new(Mutex::new(Vec::new())));

        let reply: Vec<String> = handler
            .handle(ctx, "/download nope.bin".into())
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert!(reply[0].starts_with("Cannot offer nope.bin"));
        assert!(sink.0.lock().is_empty());
    }
}
