use std::io;
use thiserror::Error;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf,
};

const BUFFER_CAPACITY: usize = 131072;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Read unexpected EOF")]
    ReadUnexpectedEof,

    #[error("An IO error occurred: {0}")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, TransportError>;

/// Splits a connected byte stream into buffered read/write transports so
/// the read and write paths can be driven independently.
pub fn split<IO>(io: IO) -> (ReadTransport<ReadHalf<IO>>, WriteTransport<WriteHalf<IO>>)
where
    IO: AsyncRead + AsyncWrite,
{
    let (r, w) = tokio::io::split(io);
    (ReadTransport::new(r), WriteTransport::new(w))
}

pub struct ReadTransport<R> {
    io: BufReader<R>,
    recv_bytes: u64,
}

impl<R: AsyncRead + Unpin> ReadTransport<R> {
    pub fn new(io: R) -> Self {
        Self {
            io: BufReader::with_capacity(BUFFER_CAPACITY, io),
            recv_bytes: 0,
        }
    }

    pub fn get_recv_bytes(&self) -> u64 {
        self.recv_bytes
    }

    pub async fn read_u8(&mut self) -> Result<u8> {
        let value = self.io.read_u8().await.map_err(map_eof)?;
        self.recv_bytes += 1;
        Ok(value)
    }

    pub async fn read_u32(&mut self) -> Result<u32> {
        let value = self.io.read_u32().await.map_err(map_eof)?;
        self.recv_bytes += 4;
        Ok(value)
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<usize> {
        let nread = self.io.read_exact(buf).await.map_err(map_eof)?;
        self.recv_bytes += nread as u64;
        Ok(nread)
    }
}

pub struct WriteTransport<W> {
    io: BufWriter<W>,
    send_bytes: u64,
}

impl<W: AsyncWrite + Unpin> WriteTransport<W> {
    pub fn new(io: W) -> Self {
        Self {
            io: BufWriter::with_capacity(BUFFER_CAPACITY, io),
            send_bytes: 0,
        }
    }

    pub fn get_send_bytes(&self) -> u64 {
        self.send_bytes
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.io.write_all(buf).await?;
        self.send_bytes += buf.len() as u64;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        Ok(self.io.flush().await?)
    }
}

fn map_eof(err: io::Error) -> TransportError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        TransportError::ReadUnexpectedEof
    } else {
        TransportError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_counters_track_consumed_bytes() {
        let data: &[u8] = &[1, 0, 0, 0, 2, 9, 9];
        let mut reader = ReadTransport::new(data);

        assert_eq!(reader.read_u8().await.unwrap(), 1);
        assert_eq!(reader.read_u32().await.unwrap(), 2);
        let mut rest = [0u8; 2];
        reader.read_exact(&mut rest).await.unwrap();
        assert_eq!(rest, [9, 9]);
        assert_eq!(reader.get_recv_bytes(), 7);
    }

    #[tokio::test]
    async fn short_stream_reports_eof() {
        let data: &[u8] = &[1, 2];
        let mut reader = ReadTransport::new(data);
        let mut buf = [0u8; 4];
        match reader.read_exact(&mut buf).await {
            Err(TransportError::ReadUnexpectedEof) => {}
            other => panic!("expected EOF error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn write_counters_track_written_bytes() {
        let (client, mut server) = tokio::io::duplex(64);
        let (_, mut writer) = split(client);

        writer.write_all(&[1, 2, 3]).await.unwrap();
        writer.flush().await.unwrap();
        assert_eq!(writer.get_send_bytes(), 3);

        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }
}
