//! RFC 4571 framing: each TCP read yields a 2-byte big-endian length
//! prefix followed by that many bytes of RTP packet.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::ps::LARGE_PACKET;

/// Read one length-prefixed RTP packet. Returns `Ok(None)` on clean EOF
/// (nothing read at all), `Err(ZeroLengthFrame)` if the length prefix is
/// zero. A length over [`LARGE_PACKET`] is allowed through; the caller
/// only treats it as fatal when the decoder is already recovering.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 2];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u16::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, Error::ZeroLengthFrame));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

pub fn is_oversize(len: usize) -> bool {
    len > LARGE_PACKET
}
