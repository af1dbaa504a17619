//! Textual wire encoder for messages.
//!
//! Messages serialize as an optional leading system text followed by
//! `<role:user/>` / `<role:assistant/>` sections; binary parts become
//! `<binary src="data:…"/>` elements (or are spilled to disk), reasoning
//! parts coalesce inside one `<think>…</think>` element until a
//! non-reasoning part or an explicit flush closes it.

use std::io::Write;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use quick_xml::escape::partial_escape;

use crate::error::Result;
use crate::message::{ContentPart, Message, Role};

pub struct MessageEncoder<W: Write> {
    w: W,
    in_reasoning: bool,
    skip_reasoning: bool,
    no_role: bool,
    text_only: bool,
    last_role: Option<Role>,
    last_part_same: Option<std::mem::Discriminant<ContentPart>>,
    binary_output_dir: Option<std::path::PathBuf>,
}

impl<W: Write> MessageEncoder<W> {
    pub fn new(w: W) -> Self {
        Self {
            w,
            in_reasoning: false,
            skip_reasoning: false,
            no_role: false,
            text_only: false,
            last_role: None,
            last_part_same: None,
            binary_output_dir: None,
        }
    }

    /// Elide reasoning parts entirely.
    pub fn skip_reasoning(&mut self) {
        self.skip_reasoning = true;
    }

    /// Suppress `<role:…/>` tags.
    pub fn no_role(&mut self) {
        self.no_role = true;
    }

    /// Drop binary parts.
    pub fn text_only(&mut self) {
        self.text_only = true;
    }

    /// Spill binary parts to files under `dir` and reference them as
    /// `![binary](path)` instead of inlining a data URL.
    pub fn set_binary_output_dir(&mut self, dir: impl Into<std::path::PathBuf>) {
        self.binary_output_dir = Some(dir.into());
    }

    pub fn encode(&mut self, system: &str, messages: &[Message]) -> Result<()> {
        let system = system.trim();
        if !system.is_empty() {
            writeln!(self.w, "{system}")?;
        }
        for msg in messages {
            self.encode_message(msg)?;
        }
        self.flush()
    }

    pub fn encode_message(&mut self, msg: &Message) -> Result<()> {
        if !self.no_role {
            if self.last_role.is_some() && self.last_role != Some(msg.role) {
                writeln!(self.w)?;
            }
            self.last_role = Some(msg.role);
            write!(self.w, "<role:{}/>", msg.role)?;
        }
        for part in &msg.parts {
            self.encode_part(part)?;
        }
        self.flush()
    }

    pub fn encode_part(&mut self, part: &ContentPart) -> Result<()> {
        let disc = std::mem::discriminant(part);
        if self.last_part_same.is_some() && self.last_part_same != Some(disc) {
            self.flush()?;
            writeln!(self.w)?;
        }
        self.last_part_same = Some(disc);
        match part {
            ContentPart::Text { text } => {
                self.flush()?;
                write!(self.w, "{text}")?;
            }
            ContentPart::Binary { mime_type, data, .. } => {
                self.flush()?;
                if self.text_only {
                    return Ok(());
                }
                if let Some(dir) = &self.binary_output_dir {
                    let path = dir.join(generate_file_name(mime_type));
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, data)?;
                    write!(self.w, "![binary]({})", path.display())?;
                } else {
                    write!(
                        self.w,
                        "<binary src=\"data:{};base64,{}\"/>",
                        mime_type,
                        BASE64.encode(data)
                    )?;
                }
            }
            ContentPart::Reasoning { text } => {
                if self.skip_reasoning {
                    return Ok(());
                }
                if !self.in_reasoning {
                    write!(self.w, "<think>")?;
                    self.in_reasoning = true;
                }
                write!(self.w, "{}", partial_escape(text))?;
            }
        }
        Ok(())
    }

    /// Close an open `<think>` element.
    pub fn flush(&mut self) -> Result<()> {
        if self.in_reasoning {
            write!(self.w, "</think>")?;
            self.in_reasoning = false;
        }
        Ok(())
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        Ok(self.w)
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.w
    }
}

fn generate_file_name(mime_type: &str) -> String {
    let ext = mime_type.rsplit('/').next().unwrap_or("bin");
    format!("{}.{}", uuid::Uuid::new_v4().simple(), ext)
}

/// Encode a part list to a string, reasoning wrapped in `<think>`.
pub fn encode_parts_to_string(parts: &[ContentPart]) -> Result<String> {
    let mut buf = Vec::new();
    let mut enc = MessageEncoder::new(&mut buf);
    for part in parts {
        enc.encode_part(part)?;
    }
    enc.flush()?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
