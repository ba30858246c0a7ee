use crate::api::{ChatApiProvider, SendOptions};
use crate::config::{HistoryWindow, SessionConfig};
use crate::error::ChatError;
use crate::history::HistoryManager;
use crate::markup::rewrite_math_delimiters;
use crate::models::{ContentPart, Message, MessageContent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Sent first with every request.
pub const SYSTEM_PROMPT: &str = "Answer in Markdown. When the answer contains math, \
write inline math as $...$ and display math as $$...$$.";

/// Output token budget for requests that carry an image.
pub const VISION_MAX_TOKENS: u32 = 16384;

/// Display boundary: receives every message as it enters the conversation
/// and every failure of a submission.
pub trait TranscriptSink: Send + Sync {
    fn on_message(&self, message: &Message);
    fn on_error(&self, error: &ChatError);
}

pub struct NoopTranscript;

impl TranscriptSink for NoopTranscript {
    fn on_message(&self, _message: &Message) {}
    fn on_error(&self, _error: &ChatError) {}
}

/// Clears the busy flag on every exit path.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One conversation: history, API provider and the display sink, with at most
/// one submission in flight.
pub struct ChatSession {
    history: Mutex<HistoryManager>,
    api_provider: Arc<dyn ChatApiProvider>,
    transcript: Arc<dyn TranscriptSink>,
    config: SessionConfig,
    busy: AtomicBool,
}

impl ChatSession {
    pub fn new(
        history: HistoryManager,
        api_provider: Arc<dyn ChatApiProvider>,
        config: SessionConfig,
    ) -> Self {
        Self {
            history: Mutex::new(history),
            api_provider,
            transcript: Arc::new(NoopTranscript),
            config,
            busy: AtomicBool::new(false),
        }
    }

    pub fn with_transcript(mut self, transcript: Arc<dyn TranscriptSink>) -> Self {
        self.transcript = transcript;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// True while a submission is awaiting its reply.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn history(&self) -> Vec<Message> {
        self.history.lock().await.history()
    }

    pub async fn last_messages(&self, count: usize) -> Vec<Message> {
        self.history.lock().await.last_messages(count)
    }

    /// Empties the stored conversation. Refused while a reply is pending.
    pub async fn clear_history(&self) -> Result<(), ChatError> {
        let _guard = self.begin()?;
        self.history.lock().await.clear_history().await?;
        Ok(())
    }

    /// Records the user's message, asks the API for a reply, records and
    /// returns the reply.
    ///
    /// On failure the user's message stays recorded, no reply is added and
    /// the error is also reported to the transcript sink. A call made while
    /// another is pending fails with [`ChatError::Busy`], reported the same
    /// way, and changes nothing.
    pub async fn handle_user_submit(
        &self,
        text: &str,
        image_data_url: Option<&str>,
    ) -> Result<Message, ChatError> {
        let result = match self.begin() {
            Ok(_guard) => self.submit(text, image_data_url).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            log::error!("Submission failed: {}", e);
            self.transcript.on_error(e);
        }
        result
    }

    fn begin(&self) -> Result<BusyGuard<'_>, ChatError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                log::warn!("Rejected submission: a reply is still pending");
                ChatError::Busy
            })?;
        Ok(BusyGuard(&self.busy))
    }

    async fn submit(&self, text: &str, image_data_url: Option<&str>) -> Result<Message, ChatError> {
        let has_image = image_data_url.is_some();
        let user_message = Message::user(build_user_content(text, image_data_url));

        // Prior turns are taken before the new message is recorded
        let prior = {
            let mut history = self.history.lock().await;
            let prior = match self.config.history_window {
                HistoryWindow::Full => history.history(),
                HistoryWindow::Recent(count) => history.last_messages(count),
            };
            let persisted = history.add_message(user_message.clone()).await;
            self.transcript.on_message(&user_message);
            persisted?;
            prior
        };

        let options = SendOptions {
            model: Some(if has_image {
                self.config.vision_model.clone()
            } else {
                self.config.text_model.clone()
            }),
            temperature: self.config.temperature,
            max_tokens: has_image.then_some(VISION_MAX_TOKENS),
        };

        let mut outgoing = Vec::with_capacity(prior.len() + 2);
        outgoing.push(Message::system(SYSTEM_PROMPT));
        outgoing.extend(prior);
        outgoing.push(user_message);

        log::info!(
            "Submitting {} messages (image attached: {})",
            outgoing.len(),
            has_image
        );
        let response = self.api_provider.send_message(&outgoing, &options).await?;

        let reply = response
            .choices
            .into_iter()
            .next()
            .map(|choice| postprocess_reply(choice.message))
            .ok_or(ChatError::EmptyCompletion)?;

        let mut history = self.history.lock().await;
        let persisted = history.add_message(reply.clone()).await;
        self.transcript.on_message(&reply);
        persisted?;

        Ok(reply)
    }
}

/// Plain text, or `[text?, image]` parts when an image is attached. The text
/// part is dropped when the text is blank.
pub fn build_user_content(text: &str, image_data_url: Option<&str>) -> MessageContent {
    match image_data_url {
        Some(url) => {
            let mut parts = Vec::with_capacity(2);
            if !text.trim().is_empty() {
                parts.push(ContentPart::text(text));
            }
            parts.push(ContentPart::image(url));
            MessageContent::Parts(parts)
        }
        None => MessageContent::Text(text.to_string()),
    }
}

/// Rewrites math delimiters in plain-text replies; part lists pass through.
pub fn postprocess_reply(message: Message) -> Message {
    match &message.content {
        MessageContent::Text(text) => Message::new(message.role, rewrite_math_delimiters(text)),
        MessageContent::Parts(_) => message,
    }
}
