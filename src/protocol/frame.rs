//! Transport frames and their byte-stream codec.
//!
//! A frame on the wire is a big-endian `u64` body length, one flag byte and
//! a `bincode` body. Bodies of at least [`COMPRESS_THRESHOLD`] bytes are LZ4
//! compressed with the uncompressed size prepended.

use crate::core::{Error, Result};
use crate::protocol::messages::{DownloadMsg, UploadMsg};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub type LenType = u64;
pub const LEN_TYPE_SIZE: usize = std::mem::size_of::<LenType>();

/// Bodies this large or larger are compressed.
pub const COMPRESS_THRESHOLD: usize = 4096;

/// Frames larger than this are refused.
pub const MAX_FRAME_LEN: usize = 1 << 30;

const FLAG_RAW: u8 = 0;
const FLAG_LZ4: u8 = 1;

/// Server to client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerFrame {
    Download(DownloadMsg),
    /// Receipt of the upload with the same sequence number.
    Ack { seq: u64, ok: bool },
}

/// Client to server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientFrame {
    Upload { seq: u64, msg: UploadMsg },
}

/// Encode `msg` into a complete frame.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let body = bincode::serialize(msg)?;
    let (flag, body) = if body.len() >= COMPRESS_THRESHOLD {
        (FLAG_LZ4, compress_prepend_size(&body))
    } else {
        (FLAG_RAW, body)
    };

    let len = (body.len() + 1) as LenType;
    let mut frame = Vec::with_capacity(LEN_TYPE_SIZE + 1 + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.push(flag);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a frame body (flag byte onwards).
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let (&flag, payload) = body
        .split_first()
        .ok_or_else(|| Error::Protocol("empty frame".to_string()))?;
    match flag {
        FLAG_RAW => Ok(bincode::deserialize(payload)?),
        FLAG_LZ4 => Ok(bincode::deserialize(&decompress_size_prepended(payload)?)?),
        other => Err(Error::Protocol(format!("unknown frame flag {other}"))),
    }
}

/// Write one frame and flush.
pub async fn write_frame<W, T>(tx: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode_frame(msg)?;
    tx.write_all(&frame).await?;
    tx.flush().await?;
    Ok(())
}

/// Read one frame. Returns `None` on a clean end of stream before the
/// length prefix.
pub async fn read_frame<R, T>(rx: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut size_buf = [0u8; LEN_TYPE_SIZE];
    match rx.read_exact(&mut size_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = LenType::from_be_bytes(size_buf) as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(Error::Protocol(format!("invalid frame length {len}")));
    }

    let mut body = vec![0u8; len];
    rx.read_exact(&mut body).await?;
    decode_body(&body).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{serialize, Tensor};
    use crate::core::ModelVersion;

    fn upload(n: usize) -> ClientFrame {
        let t = Tensor::from_f32(&[n], vec![0.25; n]).unwrap();
        ClientFrame::Upload {
            seq: 9,
            msg: UploadMsg::weights("c", ModelVersion::from("1"), vec![serialize(&t)]),
        }
    }

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1 << 16);
        let small = upload(4);
        let large = upload(4096);

        write_frame(&mut a, &small).await.unwrap();
        write_frame(&mut a, &large).await.unwrap();
        drop(a);

        let got: ClientFrame = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(got, small);
        let got: ClientFrame = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(got, large);
        assert!(read_frame::<_, ClientFrame>(&mut b).await.unwrap().is_none());
    }

    #[test]
    fn test_large_bodies_are_compressed() {
        let small = encode_frame(&upload(4)).unwrap();
        assert_eq!(small[LEN_TYPE_SIZE], FLAG_RAW);

        let large = encode_frame(&upload(4096)).unwrap();
        assert_eq!(large[LEN_TYPE_SIZE], FLAG_LZ4);
        assert!(large.len() < 4096 * 4);

        let len = u64::from_be_bytes(large[..LEN_TYPE_SIZE].try_into().unwrap()) as usize;
        assert_eq!(len, large.len() - LEN_TYPE_SIZE);
    }

    #[test]
    fn test_unknown_flag() {
        let result = decode_body::<ServerFrame>(&[7, 0, 0]);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_zero_length_frame_rejected() {
        let mut bytes: &[u8] = &[0, 0, 0, 0, 0, 0, 0, 0];
        let result = read_frame::<_, ServerFrame>(&mut bytes).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
