//! Remote-tool client: discovery, invocation, and the content-part
//! mapping shared with the server side.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use url::Url;

use plait_core::error::{PlaitError, Result};
use plait_core::message::ContentPart;
use plait_core::response::FinishReason;
use plait_core::traits::Tool;
use plait_core::writer::ResponseWriter;
use plait_core::ExecutionContext;

use crate::spec::{
    default_specification_cache, Specification, SpecificationCache,
    DEFAULT_SPECIFICATION_PATH,
};
use crate::{HEADER_TOOL_NAME, HEADER_TOOL_USE_ID};

/// The JSON body a worker endpoint returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteToolResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ToolResultContent>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
}

impl RemoteToolResult {
    /// Convert wire content into message parts.
    pub fn to_parts(&self) -> Result<Vec<ContentPart>> {
        self.content.iter().map(ToolResultContent::to_part).collect()
    }

    /// Convert message parts into wire content.
    pub fn from_parts(parts: &[ContentPart]) -> Result<Vec<ToolResultContent>> {
        parts.iter().map(ToolResultContent::from_part).collect()
    }
}

/// One typed chunk of a remote tool result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResultContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub json: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_bytes"
    )]
    pub source: Option<Vec<u8>>,
}

mod base64_bytes {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Vec<u8>>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&BASE64.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => BASE64
                .decode(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

impl ToolResultContent {
    /// Wire content -> message part. Total over the declared formats.
    pub fn to_part(&self) -> Result<ContentPart> {
        match self.kind.as_str() {
            "text" => Ok(ContentPart::text(self.text.clone())),
            "json" => Ok(ContentPart::text(self.json.clone())),
            "reasoning" => Ok(ContentPart::reasoning(self.text.clone())),
            "document" => {
                let mime_type = match self.format.as_str() {
                    "pdf" => "application/pdf".to_string(),
                    "csv" | "html" => format!("text/{}", self.format),
                    "doc" | "docx" => "application/msword".to_string(),
                    "xls" | "xlsx" => "application/vnd.ms-excel".to_string(),
                    "txt" => "text/plain".to_string(),
                    "md" => "text/markdown".to_string(),
                    other => other.to_string(),
                };
                let mut part =
                    ContentPart::binary(mime_type, self.source.clone().unwrap_or_default());
                if !self.name.is_empty() {
                    if let ContentPart::Binary { name, .. } = &mut part {
                        *name = Some(self.name.clone());
                    }
                }
                Ok(part)
            }
            "image" => Ok(ContentPart::binary(
                format!("image/{}", self.format),
                self.source.clone().unwrap_or_default(),
            )),
            other => Err(PlaitError::RemoteTool(format!(
                "unsupported content type: {other}"
            ))),
        }
    }

    /// Message part -> wire content. Text that is valid JSON travels as
    /// `{type: "json"}`.
    pub fn from_part(part: &ContentPart) -> Result<ToolResultContent> {
        let mut content = ToolResultContent::default();
        match part {
            ContentPart::Text { text } => {
                if serde_json::from_str::<serde::de::IgnoredAny>(text).is_ok() {
                    content.kind = "json".to_string();
                    content.json = text.clone();
                } else {
                    content.kind = "text".to_string();
                    content.text = text.clone();
                }
            }
            ContentPart::Reasoning { text } => {
                content.kind = "reasoning".to_string();
                content.text = text.clone();
            }
            ContentPart::Binary {
                mime_type,
                data,
                name,
            } => {
                if let Some(name) = name {
                    content.name = name.clone();
                }
                let (kind, format) = match mime_type.as_str() {
                    "application/pdf" => ("document", "pdf"),
                    "text/csv" => ("document", "csv"),
                    "text/html" => ("document", "html"),
                    "application/msword" => ("document", "doc"),
                    "application/vnd.ms-excel" => ("document", "xls"),
                    "text/plain" => ("document", "txt"),
                    "text/markdown" => ("document", "md"),
                    "image/jpeg" => ("image", "jpeg"),
                    "image/png" => ("image", "png"),
                    "image/gif" => ("image", "gif"),
                    "image/webp" => ("image", "webp"),
                    other => {
                        return Err(PlaitError::RemoteTool(format!(
                            "unsupported binary type: {other}"
                        )))
                    }
                };
                content.kind = kind.to_string();
                content.format = format.to_string();
                content.source = Some(data.clone());
            }
        }
        Ok(content)
    }
}

/// Options for connecting a [`RemoteTool`].
pub struct RemoteToolConfig {
    pub endpoint: String,
    pub specification_path: Option<String>,
    pub client: Option<reqwest::Client>,
    pub cache: Option<Arc<SpecificationCache>>,
}

impl RemoteToolConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            specification_path: None,
            client: None,
            cache: None,
        }
    }
}

/// Client half of the remote-tool protocol.
pub struct RemoteTool {
    spec: Specification,
    worker_endpoint: Url,
    client: reqwest::Client,
}

impl RemoteTool {
    /// Discover the tool behind `endpoint`: fetch (or reuse a cached)
    /// specification and resolve its worker endpoint.
    pub async fn connect(cfg: RemoteToolConfig) -> Result<RemoteTool> {
        if cfg.endpoint.is_empty() {
            return Err(PlaitError::RemoteTool("endpoint is required".to_string()));
        }
        let base = Url::parse(&cfg.endpoint)
            .map_err(|e| PlaitError::RemoteTool(format!("parse endpoint: {e}")))?;
        let client = cfg.client.unwrap_or_default();
        let spec_path = cfg
            .specification_path
            .unwrap_or_else(|| DEFAULT_SPECIFICATION_PATH.to_string());

        let spec = match cfg.cache.as_deref() {
            Some(cache) => cache.get(base.as_str()),
            None => default_specification_cache().get(base.as_str()),
        };
        let spec = match spec {
            Some(spec) => spec,
            None => {
                let spec = fetch_specification(&client, &base, &spec_path).await?;
                match cfg.cache.as_deref() {
                    Some(cache) => cache.set(base.as_str(), spec.clone()),
                    None => default_specification_cache().set(base.as_str(), spec.clone()),
                }
                spec
            }
        };

        let worker_endpoint = match Url::parse(&spec.worker_endpoint) {
            Ok(url) => url,
            Err(_) => base.join(&spec.worker_endpoint).map_err(|e| {
                PlaitError::RemoteTool(format!("parse worker endpoint: {e}"))
            })?,
        };
        Ok(RemoteTool {
            spec,
            worker_endpoint,
            client,
        })
    }

    pub fn specification(&self) -> &Specification {
        &self.spec
    }
}

async fn fetch_specification(
    client: &reqwest::Client,
    base: &Url,
    spec_path: &str,
) -> Result<Specification> {
    let spec_url = base
        .join(spec_path)
        .map_err(|e| PlaitError::RemoteTool(format!("parse specification path: {e}")))?;
    let resp = client
        .get(spec_url)
        .send()
        .await
        .map_err(|e| PlaitError::RemoteTool(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(PlaitError::RemoteTool(
            "failed to fetch specification".to_string(),
        ));
    }
    resp.json::<Specification>()
        .await
        .map_err(|e| PlaitError::RemoteTool(format!("decode specification: {e}")))
}

impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.spec.input_schema.clone()
    }

    fn call<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        input: serde_json::Value,
        w: &'a mut (dyn ResponseWriter + 'a),
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut request = self
                .client
                .post(self.worker_endpoint.clone())
                .header(HEADER_TOOL_NAME, self.name())
                .json(&input);
            if let Some(use_id) = ctx.tool_use_id() {
                request = request.header(HEADER_TOOL_USE_ID, use_id);
            }
            let resp = request
                .send()
                .await
                .map_err(|e| PlaitError::RemoteTool(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(PlaitError::RemoteTool(format!(
                    "status code is not 200: {}",
                    resp.status()
                )));
            }
            let result: RemoteToolResult = resp
                .json()
                .await
                .map_err(|e| PlaitError::RemoteTool(format!("decode result: {e}")))?;
            let parts = result.to_parts()?;
            w.write_part(&parts)?;
            w.finish(FinishReason::EndTurn, &result.status)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_formats_map_to_mime_and_back() {
        for (format, mime) in [
            ("pdf", "application/pdf"),
            ("csv", "text/csv"),
            ("html", "text/html"),
            ("txt", "text/plain"),
            ("md", "text/markdown"),
        ] {
            let content = ToolResultContent {
                kind: "document".to_string(),
                format: format.to_string(),
                source: Some(vec![1, 2]),
                ..Default::default()
            };
            let part = content.to_part().unwrap();
            match &part {
                ContentPart::Binary { mime_type, .. } => assert_eq!(mime_type, mime),
                other => panic!("expected binary, got {other:?}"),
            }
            let back = ToolResultContent::from_part(&part).unwrap();
            assert_eq!(back.kind, "document");
            assert_eq!(back.format, format);
        }
    }

    #[test]
    fn image_formats_round_trip() {
        for format in ["jpeg", "png", "gif", "webp"] {
            let content = ToolResultContent {
                kind: "image".to_string(),
                format: format.to_string(),
                source: Some(vec![9]),
                ..Default::default()
            };
            let part = content.to_part().unwrap();
            let back = ToolResultContent::from_part(&part).unwrap();
            assert_eq!(back.kind, "image");
            assert_eq!(back.format, format);
        }
    }

    #[test]
    fn doc_aliases_collapse() {
        let content = ToolResultContent {
            kind: "document".to_string(),
            format: "docx".to_string(),
            source: Some(vec![]),
            ..Default::default()
        };
        let part = content.to_part().unwrap();
        let back = ToolResultContent::from_part(&part).unwrap();
        // docx maps onto the msword mime type, which reads back as doc
        assert_eq!(back.format, "doc");
    }

    #[test]
    fn json_valid_text_travels_as_json() {
        let part = ContentPart::text(r#"{"temperature": 21}"#);
        let content = ToolResultContent::from_part(&part).unwrap();
        assert_eq!(content.kind, "json");
        assert_eq!(content.json, r#"{"temperature": 21}"#);
        assert_eq!(content.to_part().unwrap(), ContentPart::text(r#"{"temperature": 21}"#));
    }

    #[test]
    fn plain_text_travels_as_text() {
        let part = ContentPart::text("sunny");
        let content = ToolResultContent::from_part(&part).unwrap();
        assert_eq!(content.kind, "text");
        assert_eq!(content.text, "sunny");
    }

    #[test]
    fn reasoning_round_trips() {
        let part = ContentPart::reasoning("because radar");
        let content = ToolResultContent::from_part(&part).unwrap();
        assert_eq!(content.kind, "reasoning");
        assert_eq!(content.to_part().unwrap(), part);
    }

    #[test]
    fn unknown_mime_type_is_an_error() {
        let part = ContentPart::binary("application/x-unknown", vec![]);
        assert!(ToolResultContent::from_part(&part).is_err());
    }

    #[test]
    fn document_name_is_preserved(){
        let mut part = ContentPart::binary("application/pdf", vec![1]);
        if let ContentPart::Binary { name, .. } = &mut part {
            *name = Some("report.pdf".to_string());
        }
        let content = ToolResultContent::from_part(&part).unwrap();
        assert_eq!(content.name, "report.pdf");
        let back = content.to_part().unwrap();
        assert_eq!(back, part);
    }

    #[test]
    fn source_bytes_serialize_as_base64() {
        let content = ToolResultContent {
            kind: "image".to_string(),
            format: "png".to_string(),
            source: Some(vec![0xDE, 0xAD]),
            ..Default::default()
        };
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["source"], "3q0=");
        let back: ToolResultContent = serde_json::from_value(json).unwrap();
        assert_eq!(back.source, Some(vec![0xDE, 0xAD]));
    }
}
