//! Connection headers exchanged once at the start of every TCPROS connection.
//!
//! Wire format: `[u32 LE total]` followed by entries `[u32 LE len]["key=value"]`.

use crate::error::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rosnet_types::{GraphName, MessageDescriptor, ServiceDescriptor, TopicDeclaration};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest header accepted from a peer (message definitions can be long).
pub const MAX_HEADER_SIZE: u32 = 4 * 1024 * 1024;

/// Header field names.
pub mod fields {
    pub const CALLER_ID: &str = "callerid";
    pub const TOPIC: &str = "topic";
    pub const SERVICE: &str = "service";
    pub const TYPE: &str = "type";
    pub const MD5SUM: &str = "md5sum";
    pub const MESSAGE_DEFINITION: &str = "message_definition";
    pub const REQUEST_TYPE: &str = "request_type";
    pub const RESPONSE_TYPE: &str = "response_type";
    pub const PERSISTENT: &str = "persistent";
    pub const LATCHING: &str = "latching";
    pub const PROBE: &str = "probe";
    pub const ERROR: &str = "error";
    pub const TCP_NODELAY: &str = "tcp_nodelay";
}

/// Insertion-ordered string map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionHeader {
    entries: Vec<(String, String)>,
}

impl ConnectionHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set `key`. An existing key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A field that must be present.
    pub fn require(&self, key: &str) -> Result<&str, WireError> {
        self.get(key)
            .ok_or_else(|| WireError::HandshakeFailed(format!("missing header field '{key}'")))
    }

    /// `true` when `key` is set to `1`.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key) == Some("1")
    }

    /// The single-field header sent before closing a rejected connection.
    pub fn error_reply(reason: impl Into<String>) -> Self {
        Self::new().with(fields::ERROR, reason)
    }

    /// Fail with the peer's reason when it answered with an error header.
    pub fn check_error(&self) -> Result<(), WireError> {
        match self.get(fields::ERROR) {
            Some(reason) => Err(WireError::HandshakeFailed(reason.to_string())),
            None => Ok(()),
        }
    }

    /// Header announcing a topic endpoint.
    pub fn for_topic(caller_id: &GraphName, topic: &TopicDeclaration) -> Self {
        Self::new()
            .with(fields::CALLER_ID, caller_id.as_str())
            .with(fields::TOPIC, topic.name.as_str())
            .with(fields::TYPE, topic.descriptor.type_name.as_str())
            .with(fields::MD5SUM, topic.descriptor.md5sum.as_str())
            .with(fields::MESSAGE_DEFINITION, topic.descriptor.definition.as_str())
    }

    /// Header announcing a service endpoint.
    pub fn for_service(
        caller_id: &GraphName,
        service: &GraphName,
        descriptor: &ServiceDescriptor,
    ) -> Self {
        Self::new()
            .with(fields::CALLER_ID, caller_id.as_str())
            .with(fields::SERVICE, service.as_str())
            .with(fields::TYPE, descriptor.type_name.as_str())
            .with(fields::MD5SUM, descriptor.md5sum.as_str())
            .with(fields::REQUEST_TYPE, descriptor.request_type.as_str())
            .with(fields::RESPONSE_TYPE, descriptor.response_type.as_str())
    }

    /// Check the peer's `type` and `md5sum` against a topic descriptor.
    pub fn validate_topic(&self, expected: &MessageDescriptor) -> Result<(), WireError> {
        self.check_error()?;
        let type_name = self.require(fields::TYPE)?;
        let md5sum = self.require(fields::MD5SUM)?;
        if expected.accepts(type_name, md5sum) {
            Ok(())
        } else {
            Err(WireError::HandshakeFailed(format!(
                "type mismatch: expected {}/{}, got {}/{}",
                expected.type_name, expected.md5sum, type_name, md5sum
            )))
        }
    }

    /// Check the peer's `md5sum` (and `type`, when sent) against a service
    /// descriptor.
    pub fn validate_service(&self, expected: &ServiceDescriptor) -> Result<(), WireError> {
        self.check_error()?;
        let md5sum = self.require(fields::MD5SUM)?;
        let type_name = self.get(fields::TYPE);
        if expected.accepts(type_name, md5sum) {
            Ok(())
        } else {
            Err(WireError::HandshakeFailed(format!(
                "service type mismatch: expected {}/{}, got {}/{}",
                expected.type_name,
                expected.md5sum,
                type_name.unwrap_or("<none>"),
                md5sum
            )))
        }
    }

    /// Encode including the leading total length.
    pub fn encode(&self) -> Bytes {
        let body_len: usize = self.entries.iter().map(|(k, v)| 4 + k.len() + 1 + v.len()).sum();
        let mut buf = BytesMut::with_capacity(4 + body_len);
        buf.put_u32_le(body_len as u32);
        for (key, value) in &self.entries {
            buf.put_u32_le((key.len() + 1 + value.len()) as u32);
            buf.put_slice(key.as_bytes());
            buf.put_u8(b'=');
            buf.put_slice(value.as_bytes());
        }
        buf.freeze()
    }

    /// Decode a header body (the bytes after the total length).
    pub fn decode(mut body: &[u8]) -> Result<Self, WireError> {
        let mut header = Self::new();
        while body.has_remaining() {
            if body.remaining() < 4 {
                return Err(WireError::MalformedHeader(
                    "truncated entry length".to_string(),
                ));
            }
            let len = body.get_u32_le() as usize;
            if len > body.remaining() {
                return Err(WireError::MalformedHeader(format!(
                    "entry length {len} exceeds remaining {} bytes",
                    body.remaining()
                )));
            }
            let entry = std::str::from_utf8(&body[..len])
                .map_err(|e| WireError::MalformedHeader(format!("entry is not UTF-8: {e}")))?;
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                WireError::MalformedHeader(format!("entry '{entry}' has no '='"))
            })?;
            header.insert(key, value);
            body.advance(len);
        }
        Ok(header)
    }
}

/// Read one header from the stream.
pub async fn read_header<R>(reader: &mut R) -> Result<ConnectionHeader, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_HEADER_SIZE {
        return Err(WireError::FrameTooLarge {
            size: len,
            max: MAX_HEADER_SIZE,
        });
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    ConnectionHeader::decode(&body)
}

/// Write one header to the stream.
pub async fn write_header<W>(writer: &mut W, header: &ConnectionHeader) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&header.encode()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> MessageDescriptor {
        MessageDescriptor::new("std_msgs/String", "992ce8a1687cec8c8bd883ec73ca41d1")
    }

    #[test]
    fn test_encode_layout() {
        let header = ConnectionHeader::new().with("a", "b").with("cd", "");
        let bytes = header.encode();
        // total = (4 + 3) + (4 + 3)
        assert_eq!(&bytes[..4], &14u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &3u32.to_le_bytes());
        assert_eq!(&bytes[8..11], b"a=b");
        assert_eq!(&bytes[11..15], &3u32.to_le_bytes());
        assert_eq!(&bytes[15..18], b"cd=");
    }

    #[test]
    fn test_decode_preserves_order_and_splits_on_first_equals() {
        let header = ConnectionHeader::new()
            .with("z", "1")
            .with("message_definition", "int32 x=3")
            .with("a", "2");
        let encoded = header.encode();
        let decoded = ConnectionHeader::decode(&encoded[4..]).unwrap();
        assert_eq!(decoded, header);
        let keys: Vec<&str> = decoded.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["z", "message_definition", "a"]);
        assert_eq!(decoded.get("message_definition"), Some("int32 x=3"));
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut header = ConnectionHeader::new().with("a", "1").with("b", "2");
        header.insert("a", "3");
        assert_eq!(header.len(), 2);
        assert_eq!(header.iter().next(), Some(("a", "3")));
    }

    #[test]
    fn test_decode_rejects_missing_equals() {
        let mut body = Vec::new();
        body.extend_from_slice(&5u32.to_le_bytes());
        body.extend_from_slice(b"noval");
        assert!(matches!(
            ConnectionHeader::decode(&body),
            Err(WireError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_decode_rejects_overlong_entry() {
        let mut body = Vec::new();
        body.extend_from_slice(&50u32.to_le_bytes());
        body.extend_from_slice(b"a=b");
        assert!(matches!(
            ConnectionHeader::decode(&body),
            Err(WireError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_validate_topic() {
        let caller = GraphName::new("/talker").unwrap();
        let decl = TopicDeclaration::new(GraphName::new("/chatter").unwrap(), descriptor());
        let header = ConnectionHeader::for_topic(&caller, &decl);
        assert!(header.validate_topic(&descriptor()).is_ok());

        let other = MessageDescriptor::new("std_msgs/String", "ffff");
        assert!(matches!(
            header.validate_topic(&other),
            Err(WireError::HandshakeFailed(_))
        ));

        let wildcard = header.clone().with(fields::MD5SUM, "*");
        assert!(wildcard.validate_topic(&other).is_ok());
    }

    #[test]
    fn test_error_header_surfaces_reason() {
        let reply = ConnectionHeader::error_reply("no such topic");
        match reply.validate_topic(&descriptor()) {
            Err(WireError::HandshakeFailed(reason)) => assert_eq!(reason, "no such topic"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_header_from_stream() {
        let header = ConnectionHeader::new()
            .with(fields::CALLER_ID, "/n")
            .with(fields::PROBE, "1");
        let encoded = header.encode();
        let mut mock = tokio_test::io::Builder::new()
            .read(&encoded[..6])
            .read(&encoded[6..])
            .build();
        let read = read_header(&mut mock).await.unwrap();
        assert_eq!(read, header);
        assert!(read.flag(fields::PROBE));
    }

    #[tokio::test]
    async fn test_read_header_eof_is_closed() {
        let mut mock = tokio_test::io::Builder::new().build();
        assert!(matches!(
            read_header(&mut mock).await,
            Err(WireError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_write_header_to_stream() {
        let header = ConnectionHeader::error_reply("bad");
        let encoded = header.encode();
        let mut mock = tokio_test::io::Builder::new().write(&encoded).build();
        write_header(&mut mock, &header).await.unwrap();
    }
}
