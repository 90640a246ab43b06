//! Wire Framing - 长度前缀分帧
//!
//! 每帧 = 4 字节小端长度 + 对应字节数的载荷。
//! 分帧与载荷内容无关，载荷损坏不会导致流失步。

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// 默认单条消息上限
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1_000_000;

const LENGTH_PREFIX: usize = 4;

/// 分帧错误
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame too large: {size} bytes exceeds limit of {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 长度前缀编解码器
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_message_size: usize,
}

impl FrameCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// 发送前的大小检查
    pub fn check_size(&self, size: usize) -> Result<(), FrameError> {
        if size > self.max_message_size || size > u32::MAX as usize {
            return Err(FrameError::TooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, FrameError> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX]);
        let length = u32::from_le_bytes(prefix) as usize;
        // 长度来自对端，超限时在分配缓冲区之前拒绝
        self.check_size(length)?;

        if src.len() < LENGTH_PREFIX + length {
            // 等待剩余载荷
            src.reserve(LENGTH_PREFIX + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        Ok(Some(src.split_to(length)))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        // 超长时不写入任何字节
        self.check_size(item.len())?;

        dst.reserve(LENGTH_PREFIX + item.len());
        dst.put_u32_le(item.len() as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio_util::codec::FramedRead;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame(b"first"));
        buf.extend_from_slice(&frame(b"second"));

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"first");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"second");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_prefix_and_payload_are_buffered() {
        let mut codec = FrameCodec::default();
        let bytes = frame(b"hello world");
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&bytes[..2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&bytes[2..8]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&bytes[8..]);
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"hello world");
    }

    #[test]
    fn test_empty_payload_frame() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&frame(b"")[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().len(), 0);
    }

    #[test]
    fn test_encode_writes_le_prefix() {
        let mut codec = FrameCodec::default();
        let mut dst = BytesMut::new();
        codec.encode(Bytes::from_static(b"abc"), &mut dst).unwrap();
        assert_eq!(&dst[..], &[3, 0, 0, 0, b'a', b'b', b'c']);
    }

    #[test]
    fn test_oversized_encode_writes_nothing() {
        let mut codec = FrameCodec::new(4);
        let mut dst = BytesMut::new();
        let err = codec.encode(Bytes::from_static(b"too long"), &mut dst);
        assert!(matches!(err, Err(FrameError::TooLarge { size: 8, max: 4 })));
        assert!(dst.is_empty());
    }

    #[test]
    fn test_oversized_length_prefix_is_rejected_before_buffering() {
        let mut codec = FrameCodec::new(16);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(u32::MAX - 8).to_le_bytes());
        buf.extend_from_slice(b"abcd");

        let err = codec.decode(&mut buf);
        assert!(matches!(err, Err(FrameError::TooLarge { max: 16, .. })));
        assert!(buf.capacity() < 1024);
    }

    #[test]
    fn test_frame_at_limit_is_accepted() {
        let mut codec = FrameCodec::new(3);
        let mut buf = BytesMut::from(&frame(b"abc")[..]);
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"abc");
    }

    #[tokio::test]
    async fn test_framed_read_dispatches_back_to_back_frames() {
        let mut input = frame(b"one");
        input.extend_from_slice(&frame(b"two"));
        input.extend_from_slice(&frame(b"three"));

        let mut reader = FramedRead::new(&input[..], FrameCodec::default());
        let mut frames = Vec::new();
        while let Some(item) = reader.next().await {
            frames.push(item.unwrap().to_vec());
        }
        assert_eq!(frames, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
    }
}
