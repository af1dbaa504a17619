//! The response-writer stack.
//!
//! A writer is the capability an agent streams into: metadata, role
//! switches, typed parts, and a finish signal. Writers compose: the engine
//! splices a batch collector and a reasoning mirror between a non-sink
//! agent and the caller's writer so the full response is captured for
//! downstream consumers while reasoning still reaches the end of the pipe.

use std::io::Write;

use tracing::debug;

use crate::encode::MessageEncoder;
use crate::error::Result;
use crate::message::{ContentPart, Message, Role};
use crate::metadata::{Metadata, METADATA_KEY_FINISH_MESSAGE, METADATA_KEY_FINISH_REASON};
use crate::response::{FinishReason, Response};

pub const METADATA_KEY_NEXT_AGENTS: &str = "Next-Agents";

/// Streamed response sink.
///
/// One writer serves one agent invocation; writers are not required to be
/// safe for concurrent use.
pub trait ResponseWriter: Send {
    fn metadata(&mut self) -> &mut Metadata;
    fn write_role(&mut self, role: Role) -> Result<()>;
    fn write_part(&mut self, parts: &[ContentPart]) -> Result<()>;
    fn finish(&mut self, reason: FinishReason, message: &str) -> Result<()>;
}

/// Record the agents a decision elects to run next.
pub fn set_next_agents(w: &mut dyn ResponseWriter, agents: &[String]) {
    w.metadata()
        .set_strings(METADATA_KEY_NEXT_AGENTS, agents.to_vec());
}

/// Collects parts in memory and produces a [`Response`].
///
/// Adjacent text parts merge, adjacent reasoning parts merge; binary parts
/// are never merged.
#[derive(Default)]
pub struct BatchResponseWriter {
    metadata: Metadata,
    parts: Vec<ContentPart>,
    reason: FinishReason,
    message: String,
}

impl BatchResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn response(&self) -> Response {
        Response {
            metadata: self.metadata.clone(),
            message: Message::assistant(self.parts.clone()),
            finish_reason: self.reason,
            finish_message: self.message.clone(),
        }
    }
}

impl ResponseWriter for BatchResponseWriter {
    fn metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    fn write_role(&mut self, _role: Role) -> Result<()> {
        Ok(())
    }

    fn write_part(&mut self, parts: &[ContentPart]) -> Result<()> {
        for part in parts {
            let mergeable = part.is_text() || part.is_reasoning();
            if mergeable {
                if let Some(last) = self.parts.last_mut() {
                    if last.same_type(part) {
                        match (last, part) {
                            (
                                ContentPart::Text { text: last_text },
                                ContentPart::Text { text },
                            )
                            | (
                                ContentPart::Reasoning { text: last_text },
                                ContentPart::Reasoning { text },
                            ) => {
                                last_text.push_str(text);
                                continue;
                            }
                            _ => {}
                        }
                    }
                }
            }
            self.parts.push(part.clone());
        }
        Ok(())
    }

    fn finish(&mut self, reason: FinishReason, message: &str) -> Result<()> {
        self.reason = reason;
        self.message = message.to_string();
        debug!(reason = %reason, message, "batch writer finished");
        Ok(())
    }
}

/// Streams parts through the message encoder into a byte sink.
pub struct TextStreamingResponseWriter<W: Write + Send> {
    metadata: Metadata,
    enc: MessageEncoder<W>,
}

impl<W: Write + Send> TextStreamingResponseWriter<W> {
    pub fn new(w: W) -> Self {
        Self {
            metadata: Metadata::new(),
            enc: MessageEncoder::new(w),
        }
    }

    pub fn skip_reasoning(&mut self) {
        self.enc.skip_reasoning();
    }

    pub fn set_binary_output_dir(&mut self, dir: impl Into<std::path::PathBuf>) {
        self.enc.set_binary_output_dir(dir);
    }

    /// Print the accumulated metadata after the stream.
    pub fn dump_metadata(&mut self) -> Result<()> {
        let rendered = self.metadata.to_string();
        let sink = self.enc.get_mut();
        writeln!(sink)?;
        write!(sink, "{rendered}")?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W> {
        self.enc.into_inner()
    }
}

impl<W: Write + Send> ResponseWriter for TextStreamingResponseWriter<W> {
    fn metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    fn write_role(&mut self, _role: Role) -> Result<()> {
        Ok(())
    }

    fn write_part(&mut self, parts: &[ContentPart]) -> Result<()> {
        for part in parts {
            self.enc.encode_part(part)?;
        }
        Ok(())
    }

    fn finish(&mut self, reason: FinishReason, message: &str) -> Result<()> {
        self.enc.flush()?;
        self.metadata
            .set_string(METADATA_KEY_FINISH_REASON, reason.as_str());
        if !message.is_empty() {
            self.metadata
                .set_string(METADATA_KEY_FINISH_MESSAGE, message);
        }
        Ok(())
    }
}

/// Proxies every call to a primary writer and additionally forwards
/// reasoning parts to each mirror. On finish, the primary's metadata is
/// copied into the mirrors.
pub struct ReasoningMirrorResponseWriter<'a> {
    primary: &'a mut dyn ResponseWriter,
    mirrors: Vec<&'a mut dyn ResponseWriter>,
}

impl<'a> ReasoningMirrorResponseWriter<'a> {
    pub fn new(
        primary: &'a mut dyn ResponseWriter,
        mirrors: Vec<&'a mut dyn ResponseWriter>,
    ) -> Self {
        Self { primary, mirrors }
    }
}

impl ResponseWriter for ReasoningMirrorResponseWriter<'_> {
    fn metadata(&mut self) -> &mut Metadata {
        self.primary.metadata()
    }

    fn write_role(&mut self, role: Role) -> Result<()> {
        self.primary.write_role(role)
    }

    fn write_part(&mut self, parts: &[ContentPart]) -> Result<()> {
        self.primary.write_part(parts)?;
        let mirror_parts: Vec<ContentPart> = parts
            .iter()
            .filter(|p| p.is_reasoning())
            .cloned()
            .collect();
        if mirror_parts.is_empty() {
            return Ok(());
        }
        for mirror in &mut self.mirrors {
            mirror.write_part(&mirror_parts)?;
        }
        Ok(())
    }

    fn finish(&mut self, reason: FinishReason, message: &str) -> Result<()> {
        self.primary.finish(reason, message)?;
        let snapshot = self.primary.metadata().clone();
        for mirror in &mut self.mirrors {
            mirror.metadata().merge_in_place(&snapshot);
        }
        Ok(())
    }
}

/// Rewrites outgoing text parts into reasoning parts before delegating.
pub struct AsReasoningResponseWriter<'a> {
    inner: &'a mut dyn ResponseWriter,
}

impl<'a> AsReasoningResponseWriter<'a> {
    pub fn new(inner: &'a mut dyn ResponseWriter) -> Self {
        Self { inner }
    }
}

impl ResponseWriter for AsReasoningResponseWriter<'_> {
    fn metadata(&mut self) -> &mut Metadata {
        self.inner.metadata()
    }

    fn write_role(&mut self, role: Role) -> Result<()> {
        self.inner.write_role(role)
    }

    fn write_part(&mut self, parts: &[ContentPart]) -> Result<()> {
        let rewritten: Vec<ContentPart> = parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => ContentPart::reasoning(text.clone()),
                other => other.clone(),
            })
            .collect();
        self.inner.write_part(&rewritten)
    }

    fn finish(&mut self, reason: FinishReason, message: &str) -> Result<()> {
        self.inner.finish(reason, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_coalesces_adjacent_text_and_reasoning() {
        let mut w = BatchResponseWriter::new();
        w.write_part(&[
            ContentPart::text("a"),
            ContentPart::text("b"),
            ContentPart::reasoning("r1"),
            ContentPart::reasoning("r2"),
            ContentPart::text("c"),
        ])
        .unwrap();
        let resp = w.response();
        assert_eq!(
            resp.message.parts,
            vec![
                ContentPart::text("ab"),
                ContentPart::reasoning("r1r2"),
                ContentPart::text("c"),
            ]
        );
        assert_eq!(resp.message.role, Role::Assistant);
    }

    #[test]
    fn batch_never_merges_binaries() {
        let mut w = BatchResponseWriter::new();
        w.write_part(&[
            ContentPart::binary("image/png", vec![1]),
            ContentPart::binary("image/png", vec![2]),
        ])
        .unwrap();
        assert_eq!(w.response().message.parts.len(), 2);
    }

    #[test]
    fn batch_records_finish() {
        let mut w = BatchResponseWriter::new();
        w.finish(FinishReason::MaxTokens, "truncated").unwrap();
        let resp = w.response();
        assert_eq!(resp.finish_reason, FinishReason::MaxTokens);
        assert_eq!(resp.finish_message, "truncated");
    }

    #[test]
    fn text_streaming_records_finish_metadata() {
        let mut buf = Vec::new();
        {
            let mut w = TextStreamingResponseWriter::new(&mut buf);
            w.write_part(&[ContentPart::text("out")]).unwrap();
            w.finish(FinishReason::EndTurn, "done").unwrap();
            assert_eq!(
                w.metadata().get_string("Finish-Reason"),
                Some("end_turn".into())
            );
            assert_eq!(
                w.metadata().get_string("Finish-Message"),
                Some("done".into())
            );
        }
        assert_eq!(String::from_utf8(buf).unwrap(), "out");
    }

    #[test]
    fn text_streaming_dump_metadata() {
        let mut buf = Vec::new();
        {
            let mut w = TextStreamingResponseWriter::new(&mut buf);
            w.finish(FinishReason::EndTurn, "").unwrap();
            w.dump_metadata().unwrap();
        }
        let out = String::from_utf8(buf).unwrap();
        assert!(out.contains("Finish-Reason: end_turn"));
    }

    #[test]
    fn mirror_forwards_only_reasoning() {
        let mut primary = BatchResponseWriter::new();
        let mut mirror = BatchResponseWriter::new();
        {
            let mut w = ReasoningMirrorResponseWriter::new(&mut primary, vec![&mut mirror]);
            w.write_part(&[
                ContentPart::text("body"),
                ContentPart::reasoning("thinking"),
            ])
            .unwrap();
            w.finish(FinishReason::EndTurn, "ok").unwrap();
        }
        let primary_resp = primary.response();
        assert_eq!(primary_resp.message.parts.len(), 2);
        let mirror_resp = mirror.response();
        assert_eq!(
            mirror_resp.message.parts,
            vec![ContentPart::reasoning("thinking")]
        );
    }

    #[test]
    fn mirror_copies_metadata_on_finish() {
        let mut primary = BatchResponseWriter::new();
        let mut mirror = BatchResponseWriter::new();
        {
            let mut w = ReasoningMirrorResponseWriter::new(&mut primary, vec![&mut mirror]);
            w.metadata().set_string("Next-Agents", "b");
            w.finish(FinishReason::EndTurn, "").unwrap();
        }
        assert_eq!(
            mirror.response().metadata.get_string("Next-Agents"),
            Some("b".into())
        );
    }

    #[test]
    fn as_reasoning_rewrites_text() {
        let mut batch = BatchResponseWriter::new();
        {
            let mut w = AsReasoningResponseWriter::new(&mut batch);
            w.write_part(&[
                ContentPart::text("now reasoning"),
                ContentPart::binary("image/png", vec![1]),
            ])
            .unwrap();
        }
        let parts = batch.response().message.parts;
        assert_eq!(parts[0], ContentPart::reasoning("now reasoning"));
        assert!(parts[1].is_binary());
    }

    #[test]
    fn as_reasoning_composes_with_mirror() {
        // the engine's non-sink composition: agent -> as_reasoning ->
        // mirror(batch, caller). Text lands in the batch as reasoning and is
        // mirrored to the caller.
        let mut batch = BatchResponseWriter::new();
        let mut caller = BatchResponseWriter::new();
        {
            let mut mirror =
                ReasoningMirrorResponseWriter::new(&mut batch, vec![&mut caller]);
            let mut w = AsReasoningResponseWriter::new(&mut mirror);
            w.write_part(&[ContentPart::text("streamed")]).unwrap();
            w.finish(FinishReason::EndTurn, "ok").unwrap();
        }
        assert_eq!(
            batch.response().message.parts,
            vec![ContentPart::reasoning("streamed")]
        );
        assert_eq!(
            caller.response().message.parts,
            vec![ContentPart::reasoning("streamed")]
        );
    }

    #[test]
    fn set_next_agents_records_list() {
        let mut w = BatchResponseWriter::new();
        set_next_agents(&mut w, &["x".to_string(), "y".to_string()]);
        assert_eq!(w.response().metadata.get_strings("Next-Agents"), vec!["x", "y"]);
    }
}
