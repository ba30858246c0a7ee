// Command handlers behind the CLI: one-shot subcommands and the REPL

use crate::error::ChatError;
use crate::history::HistoryManager;
use crate::image::image_to_data_url;
use crate::models::{ContentPart, Message, MessageContent};
use crate::session::{ChatSession, TranscriptSink};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};

// Data URLs are huge; show only the start
const IMAGE_PREVIEW_CHARS: usize = 40;

pub const CLEAR_PROMPT: &str = "Clear the chat history? [y/N] ";

/// Prints messages and errors to the terminal as they happen.
pub struct TerminalTranscript;

impl TranscriptSink for TerminalTranscript {
    fn on_message(&self, message: &Message) {
        println!("{}\n", render_message(message));
    }

    fn on_error(&self, error: &ChatError) {
        eprintln!("error: {}\n", error);
    }
}

/// `role> content`, with image parts shown as a short placeholder.
pub fn render_message(message: &Message) -> String {
    let body = match &message.content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => text.clone(),
                ContentPart::ImageUrl { image_url } => {
                    let preview: String = image_url.url.chars().take(IMAGE_PREVIEW_CHARS).collect();
                    if preview.len() < image_url.url.len() {
                        format!("[image: {}...]", preview)
                    } else {
                        format!("[image: {}]", preview)
                    }
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
    };
    format!("{}> {}", message.role, body)
}

/// A single submission; the transcript sink prints both turns.
///
/// `Ok(None)` means the submission failed and the transcript has already
/// shown why.
pub async fn send_message(session: &ChatSession, text: &str, image: Option<&Path>) -> Result<Option<Message>> {
    let data_url = image
        .map(image_to_data_url)
        .transpose()
        .context("Failed to attach image")?;
    match session.handle_user_submit(text, data_url.as_deref()).await {
        Ok(reply) => Ok(Some(reply)),
        Err(e) => {
            log::debug!("Send failed, already reported: {}", e);
            Ok(None)
        }
    }
}

pub fn print_history(messages: &[Message]) {
    if messages.is_empty() {
        println!("(no messages yet)");
        return;
    }
    for message in messages {
        println!("{}\n", render_message(message));
    }
}

pub fn show_history(history: &HistoryManager, last: Option<usize>) {
    let messages = match last {
        Some(count) => history.last_messages(count),
        None => history.history(),
    };
    print_history(&messages);
}

/// Clears the stored conversation, asking on stdin first unless `assume_yes`.
pub async fn clear_history(history: &mut HistoryManager, assume_yes: bool) -> Result<()> {
    if !assume_yes {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        if !confirm(&mut lines, CLEAR_PROMPT).await? {
            println!("Cancelled.");
            return Ok(());
        }
    }
    history
        .clear_history()
        .await
        .context("Failed to clear chat history")?;
    println!("History cleared.");
    Ok(())
}

/// Prints `question` and reads one answer line. End of input counts as no.
pub async fn confirm<R>(lines: &mut Lines<R>, question: &str) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    let mut stdout = tokio::io::stdout();
    stdout.write_all(question.as_bytes()).await?;
    stdout.flush().await?;
    let answer = lines.next_line().await.context("Failed to read confirmation")?;
    Ok(answer.as_deref().is_some_and(is_affirmative))
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// A line typed at the REPL prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Send(String),
    SendImage { path: PathBuf, text: String },
    History,
    Clear,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return ReplCommand::Empty;
        }
        let Some(command) = trimmed.strip_prefix('/') else {
            return ReplCommand::Send(line.trim_end_matches(['\r', '\n']).to_string());
        };

        let (name, rest) = command
            .split_once(char::is_whitespace)
            .map(|(name, rest)| (name, rest.trim_start()))
            .unwrap_or((command, ""));

        match name {
            "image" | "img" => match rest.split_once(char::is_whitespace) {
                Some((path, text)) => ReplCommand::SendImage {
                    path: PathBuf::from(path),
                    text: text.trim().to_string(),
                },
                None if !rest.is_empty() => ReplCommand::SendImage {
                    path: PathBuf::from(rest),
                    text: String::new(),
                },
                None => ReplCommand::Unknown("/image needs a file path".to_string()),
            },
            "history" => ReplCommand::History,
            "clear" => ReplCommand::Clear,
            "help" | "?" => ReplCommand::Help,
            "quit" | "exit" | "q" => ReplCommand::Quit,
            other => ReplCommand::Unknown(format!("unknown command /{}", other)),
        }
    }
}

const REPL_HELP: &str = "\
Type a message and press Enter to send it.
  /image <path> [text]  send an image (JPEG, PNG, GIF, WebP) with optional text
  /history              show the stored conversation
  /clear                clear the stored conversation
  /help                 show this help
  /quit                 leave";

/// Interactive loop. Input is not read while a reply is pending.
pub async fn run_repl(session: &ChatSession) -> Result<()> {
    let config = session.config();
    println!(
        "studychat ({} / vision: {}). /help for commands.\n",
        config.text_model, config.vision_model
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };

        match ReplCommand::parse(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Send(text) => {
                // Failures were already shown by the transcript
                let _ = session.handle_user_submit(&text, None).await;
            }
            ReplCommand::SendImage { path, text } => match image_to_data_url(&path) {
                Ok(data_url) => {
                    let _ = session.handle_user_submit(&text, Some(&data_url)).await;
                }
                Err(e) => eprintln!("error: {}\n", e),
            },
            ReplCommand::History => print_history(&session.history().await),
            ReplCommand::Clear => {
                if !confirm(&mut lines, CLEAR_PROMPT).await? {
                    println!("Cancelled.\n");
                    continue;
                }
                match session.clear_history().await {
                    Ok(()) => println!("History cleared.\n"),
                    Err(e) => eprintln!("error: {}\n", e),
                }
            }
            ReplCommand::Help => println!("{}\n", REPL_HELP),
            ReplCommand::Quit => break,
            ReplCommand::Unknown(reason) => eprintln!("{} (try /help)\n", reason),
        }
    }

    log::info!("REPL finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ChatApiProvider, SendOptions};
    use crate::config::SessionConfig;
    use crate::models::CompletionResponse;
    use crate::storage::StorageManager;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct RejectingProvider;

    #[async_trait]
    impl ChatApiProvider for RejectingProvider {
        async fn send_message(
            &self,
            _messages: &[Message],
            _options: &SendOptions,
        ) -> Result<CompletionResponse, ChatError> {
            Err(ChatError::Api {
                status: 401,
                message: "Invalid API key".to_string(),
                kind: None,
                code: None,
            })
        }
    }

    async fn history() -> HistoryManager {
        HistoryManager::new(StorageManager::in_memory().await.unwrap()).await
    }

    #[tokio::test]
    async fn failed_send_is_not_returned_as_error() {
        let session = ChatSession::new(history().await, Arc::new(RejectingProvider), SessionConfig::default());
        let outcome = send_message(&session, "hi", None).await.unwrap();
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn unreadable_image_is_an_error() {
        let session = ChatSession::new(history().await, Arc::new(RejectingProvider), SessionConfig::default());
        let result = send_message(&session, "hi", Some(Path::new("/nonexistent/photo.png"))).await;
        assert!(result.is_err());
        assert!(session.history().await.is_empty());
    }

    #[tokio::test]
    async fn confirmation_accepts_only_yes() {
        for (input, expected) in [
            ("y\n", true),
            ("YES\n", true),
            (" yes \n", true),
            ("n\n", false),
            ("\n", false),
            ("sure\n", false),
            ("", false),
        ] {
            let mut lines = BufReader::new(input.as_bytes()).lines();
            assert_eq!(confirm(&mut lines, CLEAR_PROMPT).await.unwrap(), expected, "{input:?}");
        }
    }

    #[tokio::test]
    async fn assumed_yes_clears_without_asking() {
        let mut history = history().await;
        history.add_message(Message::user("hi")).await.unwrap();
        clear_history(&mut history, true).await.unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn plain_lines_are_messages() {
        assert_eq!(
            ReplCommand::parse("what is 2+2?\n"),
            ReplCommand::Send("what is 2+2?".to_string())
        );
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(ReplCommand::parse("   \n"), ReplCommand::Empty);
    }

    #[test]
    fn image_command_takes_path_and_text() {
        assert_eq!(
            ReplCommand::parse("/image ./graph.png explain this graph"),
            ReplCommand::SendImage {
                path: PathBuf::from("./graph.png"),
                text: "explain this graph".to_string(),
            }
        );
        assert_eq!(
            ReplCommand::parse("/img photo.jpg"),
            ReplCommand::SendImage {
                path: PathBuf::from("photo.jpg"),
                text: String::new(),
            }
        );
        assert!(matches!(ReplCommand::parse("/image"), ReplCommand::Unknown(_)));
    }

    #[test]
    fn slash_commands_parse() {
        assert_eq!(ReplCommand::parse("/history"), ReplCommand::History);
        assert_eq!(ReplCommand::parse("/clear"), ReplCommand::Clear);
        assert_eq!(ReplCommand::parse("/quit"), ReplCommand::Quit);
        assert_eq!(ReplCommand::parse("/?"), ReplCommand::Help);
        assert!(matches!(ReplCommand::parse("/nope"), ReplCommand::Unknown(_)));
    }

    #[test]
    fn renders_text_and_image_parts() {
        let long_url = format!("data:image/png;base64,{}", "A".repeat(100));
        let message = Message::user(MessageContent::Parts(vec![
            ContentPart::text("look"),
            ContentPart::image(long_url),
        ]));
        assert_eq!(
            render_message(&message),
            "user> look\n[image: data:image/png;base64,AAAAAAAAAAAAAAAAAA...]"
        );
        assert_eq!(render_message(&Message::assistant("hi")), "assistant> hi");
    }
}
