//! Image request and result types

use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Decoded metadata header, keyed by field name
pub type Metadata = serde_json::Map<String, Value>;

/// Synthetic metadata key carrying the image payload size
pub const MEM_SIZE_KEY: &str = "mem_size";

/// Resolution to request from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub width: u32,
    pub height: u32,
}

impl Dimension {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One server response: the decoded metadata header plus the unread image body
///
/// The image stream is borrowed from the connection that produced it and is
/// positioned at the first byte of the image payload. It is only readable for
/// the duration of [`ReceiveHandler::on_receive`](crate::receiver::ReceiveHandler::on_receive);
/// the connection is closed as soon as the handler returns.
pub struct ImageAndMetadata<'a> {
    image_byte_size: i32,
    metadata_byte_size: i32,
    metadata: Metadata,
    image_stream: &'a mut (dyn AsyncRead + Unpin + Send),
}

impl<'a> ImageAndMetadata<'a> {
    pub fn new(
        image_byte_size: i32,
        metadata_byte_size: i32,
        metadata: Metadata,
        image_stream: &'a mut (dyn AsyncRead + Unpin + Send),
    ) -> Self {
        Self {
            image_byte_size,
            metadata_byte_size,
            metadata,
            image_stream,
        }
    }

    /// Number of image bytes the server announced
    pub fn image_byte_size(&self) -> i32 {
        self.image_byte_size
    }

    /// Number of bytes the JSON header occupied on the wire
    pub fn metadata_byte_size(&self) -> i32 {
        self.metadata_byte_size
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Value of the synthetic `mem_size` key, if present and integral
    pub fn mem_size(&self) -> Option<i64> {
        self.metadata.get(MEM_SIZE_KEY).and_then(Value::as_i64)
    }

    /// Raw access to the remaining socket input
    pub fn image_stream(&mut self) -> &mut (dyn AsyncRead + Unpin + Send) {
        &mut *self.image_stream
    }

    /// Read exactly `image_byte_size` bytes of image payload
    ///
    /// The buffer grows with the bytes that actually arrive, so an inflated
    /// size prefix fails with `UnexpectedEof` instead of allocating up front.
    pub async fn read_image(&mut self) -> io::Result<Vec<u8>> {
        let len = u64::try_from(self.image_byte_size).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid image size {}", self.image_byte_size),
            )
        })?;
        let mut buf = Vec::new();
        (&mut *self.image_stream).take(len).read_to_end(&mut buf).await?;
        if (buf.len() as u64) < len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("image truncated: expected {} bytes, got {}", len, buf.len()),
            ));
        }
        Ok(buf)
    }
}

impl std::fmt::Debug for ImageAndMetadata<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageAndMetadata")
            .field("image_byte_size", &self.image_byte_size)
            .field("metadata_byte_size", &self.metadata_byte_size)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}
