//! Text capture sources
//!
//! Descriptions are either typed or dictated. The source is chosen once
//! from configuration; capture code only sees [`TextCaptureSource`].

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::infra::{ProvenanceError, Result};

/// Raw input handed to a text source
#[derive(Debug, Clone, PartialEq)]
pub enum TextInput {
    Typed(String),
    /// Recorded audio with its MIME type
    Audio { data: Vec<u8>, mime_type: String },
}

impl From<&str> for TextInput {
    fn from(text: &str) -> Self {
        TextInput::Typed(text.to_string())
    }
}

impl From<String> for TextInput {
    fn from(text: String) -> Self {
        TextInput::Typed(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSourceKind {
    Typed,
    Dictated,
}

impl std::str::FromStr for TextSourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "typed" => Ok(TextSourceKind::Typed),
            "dictated" | "voice" => Ok(TextSourceKind::Dictated),
            other => Err(format!("unknown text capture source: {other}")),
        }
    }
}

/// Speech-to-text backend
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String>;
}

#[async_trait]
pub trait TextCaptureSource: Send + Sync {
    fn kind(&self) -> TextSourceKind;

    /// Turn raw input into a log description
    async fn capture(&self, input: TextInput) -> Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TypedText;

#[async_trait]
impl TextCaptureSource for TypedText {
    fn kind(&self) -> TextSourceKind {
        TextSourceKind::Typed
    }

    async fn capture(&self, input: TextInput) -> Result<String> {
        match input {
            TextInput::Typed(text) => Ok(text.trim().to_string()),
            TextInput::Audio { .. } => Err(ProvenanceError::Configuration(
                "audio input requires a dictated text source".into(),
            )),
        }
    }
}

/// Transcribes audio; typed input passes through
#[derive(Clone)]
pub struct DictatedText {
    transcriber: Arc<dyn Transcriber>,
}

impl DictatedText {
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self { transcriber }
    }
}

#[async_trait]
impl TextCaptureSource for DictatedText {
    fn kind(&self) -> TextSourceKind {
        TextSourceKind::Dictated
    }

    async fn capture(&self, input: TextInput) -> Result<String> {
        match input {
            TextInput::Typed(text) => Ok(text.trim().to_string()),
            TextInput::Audio { data, mime_type } => {
                let text = self.transcriber.transcribe(&data, &mime_type).await?;
                Ok(text.trim().to_string())
            }
        }
    }
}

/// Build the configured source. Dictation without a transcriber is a
/// configuration error.
pub fn text_source(
    kind: TextSourceKind,
    transcriber: Option<Arc<dyn Transcriber>>,
) -> Result<Arc<dyn TextCaptureSource>> {
    match (kind, transcriber) {
        (TextSourceKind::Typed, _) => Ok(Arc::new(TypedText)),
        (TextSourceKind::Dictated, Some(transcriber)) => Ok(Arc::new(DictatedText::new(transcriber))),
        (TextSourceKind::Dictated, None) => Err(ProvenanceError::Configuration(
            "dictated text capture needs a transcriber".into(),
        )),
    }
}
