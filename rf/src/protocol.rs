//! Retroframe wire protocol
//!
//! One exchange per connection:
//!
//! ```text
//! client -> server:  "{width}x{height}x32" 0x00
//! server -> client:  i32 BE metadata length M
//!                    M bytes UTF-8 JSON object
//!                    i32 BE image length N
//!                    N bytes image payload
//! ```
//!
//! This module handles everything up to the image payload. The payload itself
//! is left on the stream for the receive handler.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{Field, RefreshError};
use crate::image::{Dimension, MEM_SIZE_KEY, Metadata};

/// Bit depth is not negotiable; the server always renders 32-bit images
pub const BIT_DEPTH: u32 = 32;

/// Width of every length prefix on the wire
pub const INTEGER_LENGTH: usize = 4;

/// Byte that ends the request line
pub const REQUEST_TERMINATOR: u8 = 0;

/// Everything the server sends before the image payload
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHeader {
    pub metadata_byte_size: i32,
    pub image_byte_size: i32,
    /// Decoded metadata, including the synthetic `mem_size` key
    pub metadata: Metadata,
    /// Metadata exactly as received, for tracing
    pub raw_metadata: String,
}

/// Build the request line for a resolution
pub fn request_line(dimension: Dimension) -> String {
    format!("{}x{}x{}", dimension.width, dimension.height, BIT_DEPTH)
}

/// Request line plus terminator, as sent on the wire
pub fn encode_request(dimension: Dimension) -> Vec<u8> {
    let mut bytes = request_line(dimension).into_bytes();
    bytes.push(REQUEST_TERMINATOR);
    bytes
}

pub fn int_to_bytes(value: i32) -> [u8; INTEGER_LENGTH] {
    value.to_be_bytes()
}

pub fn int_from_bytes(bytes: [u8; INTEGER_LENGTH]) -> i32 {
    i32::from_be_bytes(bytes)
}

/// Write the request for `dimension` and flush
pub async fn write_request<W>(writer: &mut W, dimension: Dimension) -> Result<(), RefreshError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    debug!(line = %request_line(dimension), "write_request: sending request");
    writer
        .write_all(&encode_request(dimension))
        .await
        .map_err(RefreshError::Write)?;
    writer.flush().await.map_err(RefreshError::Write)?;
    Ok(())
}

/// Read one 4-byte big-endian length prefix
///
/// A short read is an error, as is a negative length.
pub async fn read_length<R>(reader: &mut R, field: Field) -> Result<i32, RefreshError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = [0u8; INTEGER_LENGTH];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|source| RefreshError::Read { field, source })?;
    let value = int_from_bytes(buf);
    if value < 0 {
        return Err(RefreshError::NegativeLength { field, value });
    }
    Ok(value)
}

/// Read exactly `len` bytes and decode them as a JSON object
///
/// Returns the decoded object and the raw text.
pub async fn read_metadata<R>(reader: &mut R, len: i32) -> Result<(Metadata, String), RefreshError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let expected = u64::try_from(len).map_err(|_| RefreshError::NegativeLength {
        field: Field::Metadata,
        value: len,
    })?;

    // Grow with the data actually received rather than trusting the prefix
    let mut bytes = Vec::new();
    let read = (&mut *reader)
        .take(expected)
        .read_to_end(&mut bytes)
        .await
        .map_err(|source| RefreshError::Read {
            field: Field::Metadata,
            source,
        })?;
    if (read as u64) < expected {
        return Err(RefreshError::Read {
            field: Field::Metadata,
            source: std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes, got {}", expected, read),
            ),
        });
    }

    let text = String::from_utf8(bytes)?;
    match serde_json::from_str::<Value>(&text)? {
        Value::Object(metadata) => Ok((metadata, text)),
        _ => Err(RefreshError::MetadataNotObject),
    }
}

/// Read the full response header, leaving the stream at the image payload
pub async fn read_header<R>(reader: &mut R) -> Result<ResponseHeader, RefreshError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let metadata_byte_size = read_length(reader, Field::MetadataLength).await?;
    let (mut metadata, raw_metadata) = read_metadata(reader, metadata_byte_size).await?;
    let image_byte_size = read_length(reader, Field::ImageLength).await?;
    metadata.insert(MEM_SIZE_KEY.to_string(), Value::from(image_byte_size));

    debug!(metadata_byte_size, image_byte_size, "read_header: header decoded");
    Ok(ResponseHeader {
        metadata_byte_size,
        image_byte_size,
        metadata,
        raw_metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::io::{self, Cursor};

    fn frame(metadata: &[u8], image: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&int_to_bytes(metadata.len() as i32));
        bytes.extend_from_slice(metadata);
        bytes.extend_from_slice(&int_to_bytes(image.len() as i32));
        bytes.extend_from_slice(image);
        bytes
    }

    proptest! {
        #[test]
        fn int_codec_roundtrips_full_range(value in any::<i32>()) {
            prop_assert_eq!(int_from_bytes(int_to_bytes(value)), value);
        }
    }

    #[test]
    fn test_int_to_bytes_is_big_endian() {
        assert_eq!(int_to_bytes(1), [0, 0, 0, 1]);
        assert_eq!(int_to_bytes(0x0102_0304), [1, 2, 3, 4]);
        assert_eq!(int_to_bytes(-1), [0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(int_from_bytes([0x80, 0, 0, 0]), i32::MIN);
    }

    #[test]
    fn test_request_line_hardcodes_bit_depth() {
        assert_eq!(request_line(Dimension::new(800, 480)), "800x480x32");
    }

    #[test]
    fn test_encode_request_appends_terminator() {
        assert_eq!(encode_request(Dimension::new(1, 2)), b"1x2x32\0".to_vec());
    }

    #[tokio::test]
    async fn test_write_request_matches_encoding() {
        let mut out: Vec<u8> = Vec::new();
        write_request(&mut out, Dimension::new(640, 384)).await.unwrap();
        assert_eq!(out, encode_request(Dimension::new(640, 384)));
    }

    /// Writer that records each write call separately
    #[derive(Default)]
    struct ChunkWriter {
        chunks: Vec<Vec<u8>>,
        flushes: usize,
    }

    impl AsyncWrite for ChunkWriter {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<io::Result<usize>> {
            self.get_mut().chunks.push(buf.to_vec());
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<io::Result<()>> {
            self.get_mut().flushes += 1;
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_write_request_sends_line_and_terminator_together() {
        let mut out = ChunkWriter::default();
        write_request(&mut out, Dimension::new(800, 480)).await.unwrap();

        assert_eq!(out.chunks, vec![b"800x480x32\0".to_vec()]);
        assert_eq!(out.flushes, 1);
    }

    #[tokio::test]
    async fn test_read_header_leaves_stream_at_image() {
        let mut stream = Cursor::new(frame(br#"{"a":1}"#, &[9, 8, 7]));

        let header = read_header(&mut stream).await.unwrap();
        assert_eq!(header.metadata_byte_size, 7);
        assert_eq!(header.image_byte_size, 3);
        assert_eq!(header.raw_metadata, r#"{"a":1}"#);
        assert_eq!(Value::Object(header.metadata), json!({"a": 1, "mem_size": 3}));

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, vec![9, 8, 7]);
    }

    #[tokio::test]
    async fn test_read_header_keeps_nested_values() {
        let body = br#"{"title":"x","tags":["a","b"],"geo":{"lat":1.5},"ok":true,"none":null}"#;
        let mut stream = Cursor::new(frame(body, &[]));

        let header = read_header(&mut stream).await.unwrap();
        assert_eq!(header.metadata["tags"], json!(["a", "b"]));
        assert_eq!(header.metadata["geo"]["lat"], json!(1.5));
        assert_eq!(header.metadata["ok"], json!(true));
        assert!(header.metadata["none"].is_null());
        assert_eq!(header.metadata[MEM_SIZE_KEY], json!(0));
    }

    #[tokio::test]
    async fn test_read_header_overwrites_server_mem_size() {
        let mut stream = Cursor::new(frame(br#"{"mem_size":"bogus"}"#, &[0; 5]));
        let header = read_header(&mut stream).await.unwrap();
        assert_eq!(header.metadata[MEM_SIZE_KEY], json!(5));
    }

    #[tokio::test]
    async fn test_read_length_short_read_fails() {
        let mut stream = Cursor::new(vec![0u8, 0]);
        let err = read_length(&mut stream, Field::MetadataLength).await.unwrap_err();
        assert!(matches!(
            err,
            RefreshError::Read {
                field: Field::MetadataLength,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_read_length_empty_stream_fails() {
        let mut stream = Cursor::new(Vec::<u8>::new());
        let err = read_length(&mut stream, Field::ImageLength).await.unwrap_err();
        assert!(err.is_protocol());
    }

    #[tokio::test]
    async fn test_read_length_rejects_negative() {
        let mut stream = Cursor::new(int_to_bytes(-5).to_vec());
        let err = read_length(&mut stream, Field::ImageLength).await.unwrap_err();
        assert!(matches!(
            err,
            RefreshError::NegativeLength {
                field: Field::ImageLength,
                value: -5
            }
        ));
    }

    #[tokio::test]
    async fn test_read_metadata_truncated_body_fails() {
        let mut stream = Cursor::new(br#"{"a":"#.to_vec());
        let err = read_metadata(&mut stream, 20).await.unwrap_err();
        assert!(matches!(
            err,
            RefreshError::Read {
                field: Field::Metadata,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_read_metadata_invalid_json_fails() {
        let mut stream = Cursor::new(b"not json".to_vec());
        let err = read_metadata(&mut stream, 8).await.unwrap_err();
        assert!(matches!(err, RefreshError::MetadataJson(_)));
    }

    #[tokio::test]
    async fn test_read_metadata_rejects_non_object() {
        let mut stream = Cursor::new(b"[1,2]".to_vec());
        let err = read_metadata(&mut stream, 5).await.unwrap_err();
        assert!(matches!(err, RefreshError::MetadataNotObject));
    }

    #[tokio::test]
    async fn test_read_metadata_rejects_invalid_utf8() {
        let mut stream = Cursor::new(vec![0xFFu8, 0xFE]);
        let err = read_metadata(&mut stream, 2).await.unwrap_err();
        assert!(matches!(err, RefreshError::MetadataEncoding(_)));
    }

    #[tokio::test]
    async fn test_read_metadata_accepts_trailing_whitespace() {
        let mut stream = Cursor::new(b"{\"a\":1} ".to_vec());
        let (metadata, raw) = read_metadata(&mut stream, 8).await.unwrap();
        assert_eq!(metadata["a"], json!(1));
        assert_eq!(raw.len(), 8);
    }
}
