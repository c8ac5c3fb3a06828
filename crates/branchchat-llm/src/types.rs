/// One item of a provider stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LLMChunk {
    /// A fragment of assistant text, in arrival order.
    Token(String),
    /// The provider signalled the end of the reply.
    Done,
}
