use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    System,
    Assistant,
}

/// Image reference as the completion endpoint expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One segment of a message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text.as_str()),
            Self::ImageUrl { .. } => None,
        }
    }

    pub fn image_url(&self) -> Option<&str> {
        match self {
            Self::Text { .. } => None,
            Self::ImageUrl { image_url } => Some(image_url.url.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self { role, content }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentPart::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentPart::text(text)])
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.content.push(ContentPart::image(url));
        self
    }

    /// Text parts joined in order; image parts are skipped.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<&str>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn content_parts_serialize_as_tagged_objects() -> anyhow::Result<()> {
        let message = Message::user("What's in this image?").with_image("https://img/a.png");
        let value = serde_json::to_value(&message)?;
        assert_eq!(
            value,
            json!({
                "role": "user",
                "content": [
                    {"type": "text", "text": "What's in this image?"},
                    {"type": "image_url", "image_url": {"url": "https://img/a.png"}}
                ]
            })
        );
        Ok(())
    }

    #[test]
    fn malformed_part_is_rejected() {
        let raw = json!({"type": "image_url", "text": "not an image"});
        assert!(serde_json::from_value::<ContentPart>(raw).is_err());
        let raw = json!({"type": "audio", "data": "..."});
        assert!(serde_json::from_value::<ContentPart>(raw).is_err());
    }

    #[test]
    fn message_text_skips_images() {
        let message = Message::new(
            Role::Assistant,
            vec![
                ContentPart::text("{\"answer\":"),
                ContentPart::image("https://img/b.png"),
                ContentPart::text(" 4}"),
            ],
        );
        assert_eq!(message.text(), "{\"answer\": 4}");
    }
}
