//! Subscription greeting
//!
//! ```text
//! Subscriber                              Publisher
//!   |------------ TCP connect ------------->|
//!   |                                        |  register with fan-out
//!   |<------- GREETING (5 bytes) ------------|
//!   |                                        |
//!   |<------- frames ... --------------------|
//! ```
//!
//! The greeting is written only after the subscriber has been added to the
//! publisher's fan-out, so a subscriber that finished `connect` sees every
//! frame published from then on.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Magic bytes opening every subscription
pub const MAGIC: [u8; 4] = *b"TRLY";

/// Protocol version
pub const VERSION: u8 = 1;

/// Full greeting size
pub const GREETING_LEN: usize = MAGIC.len() + 1;

/// Greeting bytes sent by the publisher
pub fn greeting() -> [u8; GREETING_LEN] {
    let mut out = [0u8; GREETING_LEN];
    out[..MAGIC.len()].copy_from_slice(&MAGIC);
    out[MAGIC.len()] = VERSION;
    out
}

/// Validate a received greeting
pub fn verify(greeting: &[u8; GREETING_LEN]) -> Result<(), String> {
    if greeting[..MAGIC.len()] != MAGIC {
        return Err("unexpected magic bytes".into());
    }
    if greeting[MAGIC.len()] != VERSION {
        return Err(format!(
            "unsupported protocol version {}",
            greeting[MAGIC.len()]
        ));
    }
    Ok(())
}

/// Publisher side: write the greeting
pub async fn send<W: AsyncWrite + Unpin>(writer: &mut W) -> std::io::Result<()> {
    writer.write_all(&greeting()).await?;
    writer.flush().await
}

/// Subscriber side: read and check the greeting
pub async fn receive<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Result<(), String>> {
    let mut buf = [0u8; GREETING_LEN];
    reader.read_exact(&mut buf).await?;
    Ok(verify(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_layout() {
        let g = greeting();
        assert_eq!(&g[..4], b"TRLY");
        assert_eq!(g[4], VERSION);
        assert!(verify(&g).is_ok());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut g = greeting();
        g[0] = b'X';
        assert!(verify(&g).is_err());
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut g = greeting();
        g[4] = VERSION + 1;
        let err = verify(&g).unwrap_err();
        assert!(err.contains("version"));
    }

    #[tokio::test]
    async fn test_send_receive_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(64);

        send(&mut server).await.unwrap();
        let outcome = receive(&mut client).await.unwrap();
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_receive_short_stream() {
        let (mut client, mut server) = tokio::io::duplex(64);

        server.write_all(b"TR").await.unwrap();
        drop(server);

        let err = receive(&mut client).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
