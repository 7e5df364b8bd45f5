/// What the local user's input box says about typing
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypingIntent {
    pub is_typing: bool,
    pub preview_text: String,
}

impl TypingIntent {
    pub fn stopped() -> Self {
        Self::default()
    }

    /// An empty preview always means "stopped typing"
    pub(crate) fn normalized(mut self) -> Self {
        if self.preview_text.is_empty() {
            self.is_typing = false;
        }
        self
    }
}

/// Turns input box changes into typing intents
///
/// Stateless: every change produces an intent immediately. Rate limiting,
/// if any, belongs to the transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypingCoalescer;

impl TypingCoalescer {
    pub fn on_input_change(&self, text: &str) -> TypingIntent {
        TypingIntent {
            is_typing: !text.is_empty(),
            preview_text: text.to_string(),
        }
    }
}
