//! Payload plus trailing tag over a single buffer.
//!
//! Frame format:
//! ```text
//! +------------------------+-------------------+
//! |  Payload (any length)  |  Tag (tag_size B) |
//! +------------------------+-------------------+
//! ```
//!
//! Outbound frames are built with [`Frame::extend`], which grows the payload
//! buffer to make room for the tag. Inbound frames use [`Frame::trailing`],
//! which treats the last `tag_size` bytes of a received buffer as the tag.

use crate::error::CodecError;

/// A view splitting one buffer into message and tag regions.
#[derive(Debug)]
pub struct Frame<'a> {
    buf: &'a mut [u8],
    tag_size: usize,
}

impl<'a> Frame<'a> {
    /// Append `tag_size` zeroed bytes to `buf` and view the result.
    pub fn extend(buf: &'a mut Vec<u8>, tag_size: usize) -> Self {
        let len = buf.len();
        buf.resize(len + tag_size, 0);
        Self {
            buf: buf.as_mut_slice(),
            tag_size,
        }
    }

    /// View the last `tag_size` bytes of `buf` as the tag.
    pub fn trailing(buf: &'a mut [u8], tag_size: usize) -> Result<Self, CodecError> {
        if buf.len() < tag_size {
            return Err(CodecError::Protocol(format!(
                "message too short: {} < {}",
                buf.len(),
                tag_size
            )));
        }
        Ok(Self { buf, tag_size })
    }

    /// Message and tag together.
    pub fn complete(&self) -> &[u8] {
        self.buf
    }

    pub fn message(&self) -> &[u8] {
        &self.buf[..self.message_len()]
    }

    pub fn tag(&self) -> &[u8] {
        &self.buf[self.message_len()..]
    }

    pub fn tag_mut(&mut self) -> &mut [u8] {
        let at = self.message_len();
        &mut self.buf[at..]
    }

    pub fn message_len(&self) -> usize {
        self.buf.len() - self.tag_size
    }
}
