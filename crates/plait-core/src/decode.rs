//! Streaming decoder for the textual message wire format.
//!
//! The input is tokenized as loose XML. Tags in the `role` namespace switch
//! the current message role, `<binary src="…"/>` elements become binary
//! parts, and every other tag is passed through verbatim into the text
//! buffer. Once tokenization ends, a small set of assembly heuristics
//! decides which leading text (if any) is the system prompt.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{PlaitError, Result};
use crate::message::{ContentPart, Message, Role};

pub struct MessageDecoder<'a> {
    input: &'a str,
}

struct PartialMessage {
    role: Option<Role>,
    parts: Vec<ContentPart>,
}

impl PartialMessage {
    fn new(role: Option<Role>) -> Self {
        Self {
            role,
            parts: Vec::new(),
        }
    }
}

impl<'a> MessageDecoder<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input }
    }

    /// Decode into `(system_prompt, messages)`.
    pub fn decode(&self) -> Result<(String, Vec<Message>)> {
        let mut reader = Reader::from_str(self.input);
        reader.config_mut().check_end_names = false;

        let mut result: Vec<PartialMessage> = Vec::new();
        let mut current = PartialMessage::new(None);
        let mut text_buf = String::new();
        let mut last_change_role: Option<Role> = None;

        macro_rules! flush_text {
            () => {
                if !text_buf.is_empty() {
                    let text = text_buf.trim();
                    if !text.is_empty() {
                        current.parts.push(ContentPart::text(text));
                    }
                    text_buf.clear();
                }
            };
        }

        macro_rules! change_role {
            ($role:expr) => {{
                let role: Role = $role;
                if current.role != Some(role) && last_change_role != Some(role) {
                    flush_text!();
                    if !current.parts.is_empty() {
                        result.push(current);
                    }
                    last_change_role = Some(role);
                    current = PartialMessage::new(Some(role));
                }
            }};
        }

        loop {
            let event = reader
                .read_event()
                .map_err(|e| PlaitError::Decode(e.to_string()))?;
            match event {
                Event::Eof => break,
                Event::Text(t) => match t.unescape() {
                    Ok(s) => text_buf.push_str(&s),
                    Err(_) => text_buf.push_str(&String::from_utf8_lossy(t.as_ref())),
                },
                Event::CData(t) => {
                    text_buf.push_str(&String::from_utf8_lossy(t.as_ref()));
                }
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if let Some(local) = name.strip_prefix("role:") {
                        change_role!(Role::parse(local)?);
                    } else if name == "binary" {
                        let part = binary_part_from_attrs(&e)?;
                        flush_text!();
                        current.parts.push(part);
                    } else {
                        text_buf.push_str(&format!(
                            "<{}>",
                            String::from_utf8_lossy(e.as_ref())
                        ));
                    }
                }
                Event::Empty(e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if let Some(local) = name.strip_prefix("role:") {
                        change_role!(Role::parse(local)?);
                    } else if name == "binary" {
                        let part = binary_part_from_attrs(&e)?;
                        flush_text!();
                        current.parts.push(part);
                    } else {
                        text_buf.push_str(&format!(
                            "<{}/>",
                            String::from_utf8_lossy(e.as_ref())
                        ));
                    }
                }
                Event::End(e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if name.strip_prefix("role:").is_some() {
                        change_role!(Role::User);
                    } else if name == "binary" {
                        // matching close for an explicit binary element
                    } else {
                        text_buf.push_str(&format!("</{name}>"));
                    }
                }
                Event::Comment(e) => {
                    text_buf.push_str(&format!(
                        "<!--{}-->",
                        String::from_utf8_lossy(e.as_ref())
                    ));
                }
                Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
            }
        }
        flush_text!();
        if !current.parts.is_empty() {
            result.push(current);
        }

        assemble(result)
    }
}

fn binary_part_from_attrs(e: &BytesStart<'_>) -> Result<ContentPart> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"src" {
            let value = attr
                .unescape_value()
                .map_err(|err| PlaitError::Decode(err.to_string()))?;
            return parse_src_url(&value);
        }
    }
    Err(PlaitError::Decode("invalid binary part".to_string()))
}

/// Apply the post-decode assembly rules.
fn assemble(mut raw: Vec<PartialMessage>) -> Result<(String, Vec<Message>)> {
    if raw.is_empty() {
        return Err(PlaitError::NoMessages);
    }
    if raw.len() == 1 {
        raw[0].role = Some(Role::User);
        return Ok((String::new(), finalize(raw)));
    }
    if raw[1].role == Some(Role::Assistant) {
        raw[0].role = Some(Role::User);
        return Ok((String::new(), finalize(raw)));
    }
    if raw[0].parts.iter().any(ContentPart::is_binary) {
        raw[0].role = Some(Role::User);
        if raw[1].role == Some(Role::User) {
            let second = raw.remove(1);
            raw[0].parts.extend(second.parts);
        }
        return Ok((String::new(), finalize(raw)));
    }
    let only_text = raw[0].parts.iter().all(ContentPart::is_text);
    if !only_text {
        raw[0].role = Some(Role::User);
        return Ok((String::new(), finalize(raw)));
    }
    let system: String = raw[0]
        .parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    let system = system.trim().to_string();
    if system.is_empty() {
        return Ok((String::new(), finalize(raw)));
    }
    raw.remove(0);
    Ok((system, finalize(raw)))
}

fn finalize(raw: Vec<PartialMessage>) -> Vec<Message> {
    raw.into_iter()
        .map(|m| Message::new(m.role.unwrap_or(Role::User), m.parts))
        .collect()
}

/// Parse a `<binary src="…">` URL. Only `data:` URLs are accepted; a
/// trailing `;base64` in the media-type section toggles base64 decoding and
/// the default media type is `text/plain`.
pub fn parse_src_url(src: &str) -> Result<ContentPart> {
    let u = url::Url::parse(src)
        .map_err(|e| PlaitError::Decode(format!("parse data URL: {e}")))?;
    if u.scheme() != "data" {
        return Err(PlaitError::Decode(format!(
            "unsupported scheme: {}",
            u.scheme()
        )));
    }
    let opaque = u.path();
    let (meta, raw_data) = opaque
        .split_once(',')
        .ok_or_else(|| PlaitError::Decode("invalid data-url: missing comma separator".into()))?;
    let mut mime_type = "text/plain";
    let mut is_base64 = false;
    if !meta.is_empty() {
        let segments: Vec<&str> = meta.split(';').collect();
        mime_type = segments[0];
        if segments.len() > 1 && segments[segments.len() - 1] == "base64" {
            is_base64 = true;
        }
    }
    let data = if is_base64 {
        BASE64
            .decode(raw_data)
            .map_err(|e| PlaitError::Decode(format!("failed to decode base64 data: {e}")))?
    } else {
        raw_data.as_bytes().to_vec()
    };
    Ok(ContentPart::binary(mime_type, data))
}
