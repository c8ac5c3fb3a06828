use branchchat_core::conversation::types::DEFAULT_TITLE_MAX_CHARS;

pub const DEFAULT_FAILURE_MARKER: &str = "Sorry, there was an error processing your request.";
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;

/// Configuration for the conversation controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub max_output_tokens: u32,
    /// Model override passed to the provider on every call.
    pub model: Option<String>,
    /// Characters of the first user message kept as the conversation title.
    pub title_max_chars: usize,
    /// Text shown in place of a reply that failed; never stored in the tree.
    pub failure_marker: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            model: None,
            title_max_chars: DEFAULT_TITLE_MAX_CHARS,
            failure_marker: DEFAULT_FAILURE_MARKER.to_string(),
        }
    }
}
