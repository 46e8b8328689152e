//! Typed payloads for the streamed chat-completions wire format.
//!
//! Each `data:` record on the stream decodes into one [`ChatCompletionChunk`].
//! Every field the upstream may omit is optional or defaulted; unknown fields
//! are ignored so that provider additions never break decoding.

use serde::Deserialize;

/// One decoded protocol unit: zero or more choice deltas.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental message content carried by one choice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallFragment>,
}

/// A partial tool invocation.
///
/// The first fragment of a call carries the stable identifier (and usually
/// the function name); later fragments may carry only argument text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallFragment {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: FragmentFunction,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FragmentFunction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: String,
}
