use std::io;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// One Maelstrom envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub src: String,
    pub dest: String,
    pub body: Body,
}

/// Message body: the `type` tag, the two correlation ids, and whatever fields
/// the workload defines.
///
/// Workloads describe their fields as `#[serde(tag = "type")]` enums and move
/// between the two forms with [`Body::from_payload`] and [`Body::payload`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Body {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Body {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            msg_id: None,
            in_reply_to: None,
            fields: Map::new(),
        }
    }

    /// Serializes a tagged payload into a body. The payload must render as a
    /// JSON object carrying a `type` field.
    pub fn from_payload<T: Serialize>(payload: &T) -> Result<Self> {
        let value = serde_json::to_value(payload).map_err(Error::malformed)?;
        serde_json::from_value(value).map_err(Error::malformed)
    }

    /// Parses this body into a tagged payload. Failures surface as
    /// `malformed-request`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        let mut object = self.fields.clone();
        object.insert("type".into(), Value::String(self.kind.clone()));
        serde_json::from_value(Value::Object(object)).map_err(Error::malformed)
    }

    pub fn is_error(&self) -> bool {
        self.kind == "error"
    }
}

pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    // Maelstrom frames every envelope as a single line of JSON.
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        let parsed = serde_json::from_str(trimmed).map_err(to_io_error)?;
        return Ok(Some(parsed));
    }
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
