//! Streaming response reconstruction.
//!
//! Consumes a byte stream of newline-delimited records and reassembles it
//! into a [`CompleteResponse`]: the exact concatenation of all content
//! fragments, the ordered tool-call sequence, and the final finish reason.
//!
//! Recovery policy: records that fail structural decoding are logged and
//! skipped, never aborting the stream. Only a transport failure while reading
//! the underlying byte stream is a hard error.

use std::collections::HashMap;
use std::fmt::Display;
use std::pin::pin;

use futures_util::{Stream, StreamExt};

use dbchat_types::ToolCall;

use crate::StreamError;
use crate::sse_types::{ChatCompletionChunk, ToolCallFragment};

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// The complete response after processing a stream.
#[derive(Debug, Clone, Default)]
pub struct CompleteResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
}

/// Merges tool-call fragments into complete calls, keyed by slot.
///
/// A fragment carrying an unseen identifier opens the next sequential slot; a
/// fragment carrying a known identifier addresses that slot; a fragment with
/// no identifier merges into the most recently opened slot. Function names
/// overwrite when non-empty, argument text always appends, so reconstruction
/// is invariant to how the upstream split the text.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    slots: Vec<Slot>,
    index_by_id: HashMap<String, usize>,
}

#[derive(Debug)]
struct Slot {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, fragment: &ToolCallFragment) {
        let index = match fragment.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => match self.index_by_id.get(id) {
                Some(&index) => index,
                None => {
                    self.slots.push(Slot {
                        id: id.to_string(),
                        name: String::new(),
                        arguments: String::new(),
                    });
                    let index = self.slots.len() - 1;
                    self.index_by_id.insert(id.to_string(), index);
                    index
                }
            },
            None => {
                // No identifier: attach to the most recently opened slot. A
                // fragment arriving before any slot is open is a decode
                // anomaly; drop it rather than guess.
                let Some(index) = self.slots.len().checked_sub(1) else {
                    tracing::warn!("tool-call fragment with no identifier and no open slot");
                    return;
                };
                index
            }
        };

        let slot = &mut self.slots[index];
        if let Some(name) = fragment.function.name.as_deref()
            && !name.is_empty()
        {
            slot.name = name.to_string();
        }
        slot.arguments.push_str(&fragment.function.arguments);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Completed calls in slot-open order.
    #[must_use]
    pub fn finish(self) -> Vec<ToolCall> {
        self.slots
            .into_iter()
            .map(|slot| ToolCall::new(slot.id, slot.name, slot.arguments))
            .collect()
    }
}

/// Extract the payload of a `data:` record, tolerating one optional space
/// after the marker. Non-data lines are protocol noise.
fn record_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix(DATA_PREFIX)?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Drain the next complete line out of the buffer, stripping the trailing
/// `\r` if present. Returns `None` until a full line has arrived.
fn drain_next_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let pos = buffer.iter().position(|&b| b == b'\n')?;
    let mut line = buffer.drain(..=pos).collect::<Vec<u8>>();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(line)
}

/// Decode one byte stream into a [`CompleteResponse`].
///
/// Each decoded chunk is handed to `on_chunk` before its deltas are folded
/// into the accumulated response, in strict arrival order.
pub async fn decode_stream<S, B, E, F>(
    stream: S,
    mut on_chunk: F,
) -> Result<CompleteResponse, StreamError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    F: FnMut(&ChatCompletionChunk),
{
    let mut stream = pin!(stream);
    let mut buffer: Vec<u8> = Vec::new();
    let mut response = CompleteResponse::default();
    let mut accumulator = ToolCallAccumulator::new();

    'read: while let Some(next) = stream.next().await {
        let bytes = next.map_err(|e| StreamError::Read(e.to_string()))?;
        buffer.extend_from_slice(bytes.as_ref());

        while let Some(line) = drain_next_line(&mut buffer) {
            if !process_line(&line, &mut response, &mut accumulator, &mut on_chunk) {
                break 'read;
            }
        }
    }

    // A trailing record without a final newline still counts.
    if !buffer.is_empty() {
        let line = std::mem::take(&mut buffer);
        process_line(&line, &mut response, &mut accumulator, &mut on_chunk);
    }

    response.tool_calls = accumulator.finish();
    Ok(response)
}

/// Fold one record into the response. Returns `false` on the end-of-stream
/// sentinel.
fn process_line<F>(
    line: &[u8],
    response: &mut CompleteResponse,
    accumulator: &mut ToolCallAccumulator,
    on_chunk: &mut F,
) -> bool
where
    F: FnMut(&ChatCompletionChunk),
{
    let Ok(line) = std::str::from_utf8(line) else {
        tracing::warn!("skipping non-UTF-8 stream record");
        return true;
    };
    let Some(payload) = record_payload(line) else {
        return true;
    };
    if payload == DONE_SENTINEL {
        return false;
    }

    let chunk: ChatCompletionChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::warn!(%e, payload_bytes = payload.len(), "skipping malformed stream record");
            return true;
        }
    };

    on_chunk(&chunk);

    for choice in &chunk.choices {
        if let Some(content) = choice.delta.content.as_deref()
            && !content.is_empty()
        {
            response.content.push_str(content);
        }
        for fragment in &choice.delta.tool_calls {
            accumulator.apply(fragment);
        }
        if let Some(reason) = choice.finish_reason.as_deref()
            && !reason.is_empty()
        {
            response.finish_reason = Some(reason.to_string());
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::{CompleteResponse, ToolCallAccumulator, decode_stream};
    use crate::StreamError;
    use crate::sse_types::ChatCompletionChunk;
    use futures_util::stream;
    use std::convert::Infallible;

    fn byte_stream(
        parts: Vec<&str>,
    ) -> impl futures_util::Stream<Item = Result<Vec<u8>, Infallible>> {
        let owned: Vec<Result<Vec<u8>, Infallible>> = parts
            .into_iter()
            .map(|s| Ok(s.as_bytes().to_vec()))
            .collect();
        stream::iter(owned)
    }

    async fn decode(parts: Vec<&str>) -> CompleteResponse {
        decode_stream(byte_stream(parts), |_| {}).await.unwrap()
    }

    fn data_line(json: &str) -> String {
        format!("data: {json}\n")
    }

    #[test]
    fn accumulator_reassembles_split_arguments() {
        let mut acc = ToolCallAccumulator::new();
        let first: ChatCompletionChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"id":"call_1","function":{"name":"execute_redis_command","arguments":""}}]}}]}"#,
        )
        .unwrap();
        let second: ChatCompletionChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"function":{"arguments":"{\"command\":\"GET "}}]}}]}"#,
        )
        .unwrap();
        let third: ChatCompletionChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"function":{"arguments":"foo\"}"}}]}}]}"#,
        )
        .unwrap();
        for chunk in [&first, &second, &third] {
            for fragment in &chunk.choices[0].delta.tool_calls {
                acc.apply(fragment);
            }
        }

        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].kind, "function");
        assert_eq!(calls[0].function.name, "execute_redis_command");
        assert_eq!(calls[0].function.arguments, "{\"command\":\"GET foo\"}");
    }

    #[test]
    fn accumulator_is_split_invariant() {
        let arguments = "{\"query\":\"SELECT 1 FROM t WHERE a = 'b'\"}";

        let reassemble = |pieces: Vec<&str>| {
            let mut acc = ToolCallAccumulator::new();
            acc.apply(
                &serde_json::from_str(
                    r#"{"id":"call_9","function":{"name":"execute_mysql_query","arguments":""}}"#,
                )
                .unwrap(),
            );
            for piece in pieces {
                let fragment =
                    serde_json::json!({"function": {"arguments": piece}});
                acc.apply(&serde_json::from_value(fragment).unwrap());
            }
            acc.finish()
        };

        let one_piece = reassemble(vec![arguments]);
        let char_at_a_time: Vec<String> = arguments.chars().map(String::from).collect();
        let many_pieces = reassemble(char_at_a_time.iter().map(String::as_str).collect());

        assert_eq!(one_piece[0].function.arguments, arguments);
        assert_eq!(many_pieces[0].function.arguments, arguments);
        assert_eq!(one_piece[0].function.name, many_pieces[0].function.name);
    }

    #[test]
    fn accumulator_keeps_slot_open_order() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply(
            &serde_json::from_str(r#"{"id":"call_b","function":{"name":"second","arguments":""}}"#)
                .unwrap(),
        );
        acc.apply(
            &serde_json::from_str(r#"{"id":"call_a","function":{"name":"first","arguments":""}}"#)
                .unwrap(),
        );
        // Addressed by id, not recency.
        acc.apply(
            &serde_json::from_str(r#"{"id":"call_b","function":{"arguments":"{}"}}"#).unwrap(),
        );

        let calls = acc.finish();
        assert_eq!(calls[0].id, "call_b");
        assert_eq!(calls[0].function.arguments, "{}");
        assert_eq!(calls[1].id, "call_a");
    }

    #[test]
    fn accumulator_drops_orphan_fragment() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply(&serde_json::from_str(r#"{"function":{"arguments":"{}"}}"#).unwrap());
        assert!(acc.is_empty());
        assert!(acc.finish().is_empty());
    }

    #[test]
    fn repeated_name_is_idempotent() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply(
            &serde_json::from_str(r#"{"id":"c1","function":{"name":"run","arguments":"a"}}"#)
                .unwrap(),
        );
        acc.apply(
            &serde_json::from_str(r#"{"id":"c1","function":{"name":"run","arguments":"b"}}"#)
                .unwrap(),
        );
        let calls = acc.finish();
        assert_eq!(calls[0].function.name, "run");
        assert_eq!(calls[0].function.arguments, "ab");
    }

    #[tokio::test]
    async fn concatenates_content_fragments_exactly() {
        let response = decode(vec![
            &data_line(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#),
            &data_line(r#"{"choices":[{"delta":{"content":"lo"}}]}"#),
            &data_line(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#),
            "data: [DONE]\n",
        ])
        .await;
        assert_eq!(response.content, "Hello");
        assert!(response.tool_calls.is_empty());
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn preserves_whitespace_in_fragments() {
        let response = decode(vec![
            &data_line(r#"{"choices":[{"delta":{"content":"a "}}]}"#),
            &data_line(r#"{"choices":[{"delta":{"content":"  b\n"}}]}"#),
            "data: [DONE]\n",
        ])
        .await;
        assert_eq!(response.content, "a   b\n");
    }

    #[tokio::test]
    async fn reconstruction_is_chunk_boundary_invariant() {
        // The same records, delivered with byte boundaries in the middle of
        // lines, must decode identically.
        let full = format!(
            "{}{}{}data: [DONE]\n",
            data_line(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#),
            data_line(r#"{"choices":[{"delta":{"content":"lo"}}]}"#),
            data_line(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#),
        );
        let (head, tail) = full.split_at(17);
        let split = decode(vec![head, tail]).await;
        let whole = decode(vec![&full]).await;
        assert_eq!(split.content, whole.content);
        assert_eq!(split.finish_reason, whole.finish_reason);
    }

    #[tokio::test]
    async fn reassembles_tool_call_across_chunks() {
        let response = decode(vec![
            &data_line(
                r#"{"choices":[{"delta":{"tool_calls":[{"id":"call_1","function":{"name":"execute_redis_command","arguments":""}}]}}]}"#,
            ),
            &data_line(
                r#"{"choices":[{"delta":{"tool_calls":[{"function":{"arguments":"{\"command\":\"GET "}}]}}]}"#,
            ),
            &data_line(
                r#"{"choices":[{"delta":{"tool_calls":[{"function":{"arguments":"foo\"}"}}]}}]}"#,
            ),
            "data: [DONE]\n",
        ])
        .await;
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "call_1");
        assert_eq!(
            response.tool_calls[0].function.name,
            "execute_redis_command"
        );
        assert_eq!(
            response.tool_calls[0].function.arguments,
            "{\"command\":\"GET foo\"}"
        );
    }

    #[tokio::test]
    async fn malformed_record_between_valid_ones_is_skipped() {
        let response = decode(vec![
            &data_line(r#"{"choices":[{"delta":{"content":"good "}}]}"#),
            "data: {not json at all\n",
            &data_line(r#"{"choices":[{"delta":{"content":"still good"}}]}"#),
            "data: [DONE]\n",
        ])
        .await;
        assert_eq!(response.content, "good still good");
    }

    #[tokio::test]
    async fn protocol_noise_lines_are_ignored() {
        let response = decode(vec![
            ": keep-alive\n",
            "event: message\n",
            "\n",
            &data_line(r#"{"choices":[{"delta":{"content":"hi"}}]}"#),
            "data: [DONE]\n",
        ])
        .await;
        assert_eq!(response.content, "hi");
    }

    #[tokio::test]
    async fn records_after_done_are_not_processed() {
        let response = decode(vec![
            &data_line(r#"{"choices":[{"delta":{"content":"before"}}]}"#),
            "data: [DONE]\n",
            &data_line(r#"{"choices":[{"delta":{"content":"after"}}]}"#),
        ])
        .await;
        assert_eq!(response.content, "before");
    }

    #[tokio::test]
    async fn missing_done_sentinel_still_yields_response() {
        // Upstream closed without the sentinel: whatever was accumulated
        // stands, including a trailing record with no final newline.
        let response = decode(vec![
            &data_line(r#"{"choices":[{"delta":{"content":"partial"}}]}"#),
            r#"data: {"choices":[{"delta":{"content":" end"}}]}"#,
        ])
        .await;
        assert_eq!(response.content, "partial end");
    }

    #[tokio::test]
    async fn last_nonempty_finish_reason_wins() {
        let response = decode(vec![
            &data_line(r#"{"choices":[{"delta":{},"finish_reason":"length"}]}"#),
            &data_line(r#"{"choices":[{"delta":{},"finish_reason":""}]}"#),
            &data_line(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#),
            "data: [DONE]\n",
        ])
        .await;
        assert_eq!(response.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[tokio::test]
    async fn crlf_line_endings_are_tolerated() {
        let response = decode(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\r\n",
            "data: [DONE]\r\n",
        ])
        .await;
        assert_eq!(response.content, "ok");
    }

    #[tokio::test]
    async fn callback_sees_every_decoded_chunk_in_order() {
        let mut seen: Vec<String> = Vec::new();
        let parts = vec![
            data_line(r#"{"choices":[{"delta":{"content":"a"}}]}"#),
            data_line(r#"{"choices":[{"delta":{"content":"b"}}]}"#),
            "data: [DONE]\n".to_string(),
        ];
        let owned: Vec<Result<Vec<u8>, Infallible>> = parts
            .iter()
            .map(|s| Ok(s.as_bytes().to_vec()))
            .collect();
        decode_stream(stream::iter(owned), |chunk| {
            if let Some(content) = chunk.choices[0].delta.content.as_deref() {
                seen.push(content.to_string());
            }
        })
        .await
        .unwrap();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn transport_failure_is_a_hard_error() {
        let items: Vec<Result<Vec<u8>, String>> = vec![
            Ok(data_line(r#"{"choices":[{"delta":{"content":"x"}}]}"#).into_bytes()),
            Err("connection reset by peer".to_string()),
        ];
        let result = decode_stream(stream::iter(items), |_| {}).await;
        match result {
            Err(StreamError::Read(msg)) => assert!(msg.contains("connection reset")),
            other => panic!("expected read error, got {other:?}"),
        }
    }
}
