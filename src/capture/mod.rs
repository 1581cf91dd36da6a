//! Field capture: products, logs and materials

mod service;
mod text;

pub use service::{CaptureConfig, CaptureOutcome, CaptureRequest, CaptureService, SaveOutcome};
pub use text::{
    text_source, DictatedText, TextCaptureSource, TextInput, TextSourceKind, Transcriber,
    TypedText,
};
