//! Small JSON helpers shared across the engine.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Deserialize the first decodable JSON value found anywhere in `input`.
///
/// Model output often wraps a JSON object in prose; this scans forward and
/// returns the first prefix that deserializes into `T`.
pub fn first_json<T: DeserializeOwned>(input: &str) -> Result<T> {
    let bytes = input.as_bytes();
    let mut last_err = None;
    for i in 0..bytes.len() {
        // only bother at plausible JSON start bytes
        let b = bytes[i];
        if !matches!(b, b'{' | b'[' | b'"' | b'-' | b'0'..=b'9' | b't' | b'f' | b'n') {
            continue;
        }
        let mut stream =
            serde_json::Deserializer::from_slice(&bytes[i..]).into_iter::<T>();
        match stream.next() {
            Some(Ok(value)) => return Ok(value),
            Some(Err(e)) => last_err = Some(e),
            None => {}
        }
    }
    match last_err {
        Some(e) => Err(e.into()),
        None => Err(crate::error::PlaitError::Decode(
            "no JSON value found".to_string(),
        )),
    }
}

/// Re-serialize `from` as JSON and deserialize it into `T`.
pub fn remarshal<T: DeserializeOwned>(from: &impl Serialize) -> Result<T> {
    let value = serde_json::to_value(from)?;
    Ok(serde_json::from_value(value)?)
}
