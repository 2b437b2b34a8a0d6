//! Chat history entries and user input.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use uuid::Uuid;

use crate::prompt::{GREETING_ID, GREETING_TEXT};
use crate::types::Speaker;

use super::backend::{ChatError, Part};

// ---------------------------------------------------------------------------
// ChatMessage
// ---------------------------------------------------------------------------

/// One entry of the visible chat history.
///
/// Bot messages start empty and grow in place while their reply streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender: Speaker,
    /// `data:` URI of an attached image.
    pub image_ref: Option<String>,
}

impl ChatMessage {
    /// The bot greeting that opens every history.
    pub fn greeting() -> Self {
        Self {
            id: GREETING_ID.to_string(),
            text: GREETING_TEXT.to_string(),
            sender: Speaker::Bot,
            image_ref: None,
        }
    }

    pub fn user(text: impl Into<String>, image_ref: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            sender: Speaker::User,
            image_ref,
        }
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            sender: Speaker::Bot,
            image_ref: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ImageAttachment
// ---------------------------------------------------------------------------

/// Raw image bytes with their MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl ImageAttachment {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Read an image file, inferring the MIME type from its extension.
    pub fn from_file(path: &Path) -> Result<Self, ChatError> {
        let mime_type = mime_for_path(path).ok_or_else(|| {
            ChatError::Attachment(format!("{} is not a supported image type", path.display()))
        })?;
        let data = std::fs::read(path)
            .map_err(|e| ChatError::Attachment(format!("{}: {e}", path.display())))?;
        Ok(Self::new(mime_type, data))
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.data)
    }

    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "heif" => "image/heif",
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// ChatInput
// ---------------------------------------------------------------------------

/// What the user submits for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatInput {
    pub text: String,
    pub image: Option<ImageAttachment>,
}

impl ChatInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }

    /// Blank text and no image.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.image.is_none()
    }

    /// Request parts: the text (when not blank) followed by the image.
    pub fn to_parts(&self) -> Vec<Part> {
        let mut parts = Vec::with_capacity(2);
        if !self.text.trim().is_empty() {
            parts.push(Part::text(self.text.clone()));
        }
        if let Some(image) = &self.image {
            parts.push(Part::inline_data(image.mime_type.clone(), image.to_base64()));
        }
        parts
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn greeting_has_fixed_id() {
        let greeting = ChatMessage::greeting();
        assert_eq!(greeting.id, "1");
        assert_eq!(greeting.sender, Speaker::Bot);
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(ChatMessage::bot("").id, ChatMessage::bot("").id);
    }

    #[test]
    fn blank_input_is_empty_unless_an_image_is_attached() {
        assert!(ChatInput::text("  \t").is_empty());
        let with_image = ChatInput::text("").with_image(ImageAttachment::new("image/png", vec![1]));
        assert!(!with_image.is_empty());
    }

    #[test]
    fn parts_put_text_before_image_and_skip_blank_text() {
        let image = ImageAttachment::new("image/jpeg", vec![0xff, 0xd8]);

        let parts = ChatInput::text("What is this leaf spot?")
            .with_image(image.clone())
            .to_parts();
        assert_eq!(
            parts,
            vec![
                Part::text("What is this leaf spot?"),
                Part::inline_data("image/jpeg", "/9g="),
            ]
        );

        let parts = ChatInput::text(" ").with_image(image).to_parts();
        assert_eq!(parts, vec![Part::inline_data("image/jpeg", "/9g=")]);
    }

    #[test]
    fn data_uri_format() {
        let image = ImageAttachment::new("image/png", b"abc".to_vec());
        assert_eq!(image.data_uri(), "data:image/png;base64,YWJj");
    }

    #[test]
    fn from_file_infers_mime_type() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("Leaf.JPG");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let image = ImageAttachment::from_file(&path).unwrap();
        assert_eq!(image.mime_type, "image/jpeg");
        assert_eq!(image.data, vec![1, 2, 3]);
    }

    #[test]
    fn from_file_rejects_unknown_types_and_missing_files() {
        let dir = tempdir().expect("temp dir");
        let text = dir.path().join("notes.txt");
        std::fs::write(&text, "x").unwrap();
        assert!(matches!(
            ImageAttachment::from_file(&text),
            Err(ChatError::Attachment(_))
        ));
        assert!(matches!(
            ImageAttachment::from_file(&dir.path().join("gone.png")),
            Err(ChatError::Attachment(_))
        ));
    }
}
