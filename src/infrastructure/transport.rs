// TCP transport - Connects to the realtime server and streams raw byte chunks
use crate::application::session::{ByteReader, Connector};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> std::io::Result<ByteReader> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Yield every chunk read from `reader` until EOF. Dropping the stream drops
/// the reader, which closes the connection.
pub fn chunk_stream<R>(mut reader: R) -> impl Stream<Item = std::io::Result<Bytes>>
where
    R: AsyncRead + Unpin,
{
    async_stream::try_stream! {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        loop {
            buf.reserve(READ_CHUNK);
            let n = reader.read_buf(&mut buf).await?;
            if n == 0 {
                break;
            }
            yield buf.split().freeze();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_chunk_stream_ends_at_eof() {
        let (mut writer, reader) = tokio::io::duplex(64);
        writer.write_all(b"{\"bmnum\":1").await.unwrap();
        writer.write_all(b",\"slist\":[]}").await.unwrap();
        drop(writer);

        let chunks: Vec<Bytes> = chunk_stream(reader)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.concat(), b"{\"bmnum\":1,\"slist\":[]}".to_vec());
    }

    #[tokio::test]
    async fn test_tcp_connector_reads_from_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hello").await.unwrap();
        });

        let connector = TcpConnector::new("127.0.0.1".to_string(), port);
        assert_eq!(connector.describe(), format!("127.0.0.1:{port}"));
        let reader = connector.connect().await.unwrap();

        let chunks: Vec<Bytes> = chunk_stream(reader)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.concat(), b"hello".to_vec());
    }
}
