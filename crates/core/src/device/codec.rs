//! The obfuscation and framing used by Kasa devices on port 9999.
//!
//! Payloads are JSON passed through an XOR autokey cipher seeded with 171.
//! Over TCP every message is prefixed with its length as a big-endian `u32`;
//! UDP discovery datagrams carry the bare cipher text.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const INITIAL_KEY: u8 = 171;

/// Upper bound on a framed response; sysinfo replies are a few kilobytes.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

pub fn encrypt(plain: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    plain
        .iter()
        .map(|&byte| {
            key ^= byte;
            key
        })
        .collect()
}

pub fn decrypt(cipher: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    cipher
        .iter()
        .map(|&byte| {
            let plain = key ^ byte;
            key = byte;
            plain
        })
        .collect()
}

/// Encrypts `plain` and prepends the length header.
pub fn frame(plain: &[u8]) -> Vec<u8> {
    let cipher = encrypt(plain);
    let mut out = Vec::with_capacity(cipher.len() + 4);
    out.extend_from_slice(&(cipher.len() as u32).to_be_bytes());
    out.extend_from_slice(&cipher);
    out
}

pub async fn write_frame<W>(writer: &mut W, plain: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame(plain)).await?;
    writer.flush().await
}

/// Reads one length-prefixed message and returns the decrypted payload.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }
    let mut cipher = vec![0u8; len];
    reader.read_exact(&mut cipher).await?;
    Ok(decrypt(&cipher))
}
