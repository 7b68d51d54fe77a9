use serde_json::json;

/// Events emitted by the orchestration loop during one turn. Strict ordering
/// contract: zero or more Content/Image events, then exactly one terminal
/// event. Done terminates a successful (or partially successful) turn; Error
/// terminates a failed one and is never followed by Done.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnEvent {
    Content { text: String },
    Image { text: String, url: String },
    Error { message: String },
    Done,
}

impl TurnEvent {
    /// The payload that counts toward the persisted assistant text.
    /// What is streamed is what is stored: the assistant row equals the
    /// concatenation of these across the turn.
    pub fn visible_text(&self) -> Option<&str> {
        match self {
            Self::Content { text } | Self::Image { text, .. } => Some(text),
            Self::Error { .. } | Self::Done => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done)
    }

    /// Encode as the wire payload carried in one `data: <json>` SSE frame.
    pub fn to_frame(&self) -> serde_json::Value {
        match self {
            Self::Content { text } => json!({ "content": text }),
            Self::Image { text, url } => json!({ "content": text, "imageUrl": url }),
            Self::Error { message } => json!({ "error": message }),
            Self::Done => json!({ "done": true }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_frame_shape() {
        let frame = TurnEvent::Content { text: "hello".into() }.to_frame();
        assert_eq!(frame, json!({"content": "hello"}));
    }

    #[test]
    fn image_frame_shape() {
        let frame = TurnEvent::Image {
            text: "![kot](https://img.example/1.png)".into(),
            url: "https://img.example/1.png".into(),
        }
        .to_frame();
        assert_eq!(frame["imageUrl"], "https://img.example/1.png");
        assert!(frame["content"].as_str().unwrap().starts_with("!["));
    }

    #[test]
    fn error_frame_shape() {
        let frame = TurnEvent::Error { message: "boom".into() }.to_frame();
        assert_eq!(frame, json!({"error": "boom"}));
    }

    #[test]
    fn done_frame_shape() {
        let frame = TurnEvent::Done.to_frame();
        assert_eq!(frame, json!({"done": true}));
    }

    #[test]
    fn visible_text_covers_content_and_image() {
        assert_eq!(
            TurnEvent::Content { text: "a".into() }.visible_text(),
            Some("a")
        );
        assert_eq!(
            TurnEvent::Image { text: "b".into(), url: "u".into() }.visible_text(),
            Some("b")
        );
        assert_eq!(TurnEvent::Done.visible_text(), None);
        assert_eq!(
            TurnEvent::Error { message: "e".into() }.visible_text(),
            None
        );
    }

    #[test]
    fn terminal_classification() {
        assert!(TurnEvent::Done.is_terminal());
        assert!(TurnEvent::Error { message: "e".into() }.is_terminal());
        assert!(!TurnEvent::Content { text: "t".into() }.is_terminal());
    }
}
