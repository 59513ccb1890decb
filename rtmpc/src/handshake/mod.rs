use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

use rtmpc_core::transport::{ReadTransport, WriteTransport};

use self::error::HandshakeError;

pub mod error;

pub const RTMP_VERSION: u8 = 3;
pub const RTMP_HANDSHAKE_SIZE: usize = 1536;

type Result<T> = std::result::Result<T, HandshakeError>;

fn new_block() -> [u8; RTMP_HANDSHAKE_SIZE] {
    // 4-byte time and 4-byte zero prefix, then the random challenge
    let mut block = [0u8; RTMP_HANDSHAKE_SIZE];
    rand::thread_rng().fill_bytes(&mut block[8..]);
    block
}

/// Client side of the plain RTMP handshake: send C0+C1, validate S0,
/// verify S2 echoes our challenge, echo S1 back as C2.
pub struct Client {
    c1: [u8; RTMP_HANDSHAKE_SIZE],
}

impl Client {
    pub fn new() -> Self {
        Self { c1: new_block() }
    }

    pub async fn handshake<R, W>(
        &mut self,
        rd: &mut ReadTransport<R>,
        wr: &mut WriteTransport<W>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        wr.write_all(&[RTMP_VERSION]).await?;
        wr.write_all(&self.c1).await?;
        wr.flush().await?;
        trace!("Handshake: c0c1 sent");

        let version = rd.read_u8().await?;
        if version != RTMP_VERSION {
            return Err(HandshakeError::InvalidVersion(version));
        }
        let mut s1 = [0u8; RTMP_HANDSHAKE_SIZE];
        rd.read_exact(&mut s1).await?;
        let mut s2 = [0u8; RTMP_HANDSHAKE_SIZE];
        rd.read_exact(&mut s2).await?;
        trace!("Handshake: s0s1s2 received");
        if s2[8..] != self.c1[8..] {
            return Err(HandshakeError::EchoMismatch);
        }

        wr.write_all(&s1).await?;
        wr.flush().await?;
        trace!("Handshake: done");
        Ok(())
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// Server side: validate C0, send S0+S1+S2 (S2 echoes C1), verify C2
/// echoes our challenge.
pub struct Server {
    s1: [u8; RTMP_HANDSHAKE_SIZE],
}

impl Server {
    pub fn new() -> Self {
        Self { s1: new_block() }
    }

    pub async fn handshake<R, W>(
        &mut self,
        rd: &mut ReadTransport<R>,
        wr: &mut WriteTransport<W>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let version = rd.read_u8().await?;
        if version != RTMP_VERSION {
            return Err(HandshakeError::InvalidVersion(version));
        }
        let mut c1 = [0u8; RTMP_HANDSHAKE_SIZE];
        rd.read_exact(&mut c1).await?;
        trace!("Handshake: c0c1 received");

        wr.write_all(&[RTMP_VERSION]).await?;
        wr.write_all(&self.s1).await?;
        wr.write_all(&c1).await?;
        wr.flush().await?;
        trace!("Handshake: s0s1s2 sent");

        let mut c2 = [0u8; RTMP_HANDSHAKE_SIZE];
        rd.read_exact(&mut c2).await?;
        if c2[8..] != self.s1[8..] {
            return Err(HandshakeError::EchoMismatch);
        }
        trace!("Handshake: done");
        Ok(())
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}
