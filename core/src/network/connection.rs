//! Network connection handling
//!
//! Frames requests and responses over any async byte stream.

use crate::error::{PineError, PineResult};
use crate::network::protocol::{
    MAX_RESPONSE_LENGTH, REQUEST_HEADER_LEN, RESPONSE_HEADER_LEN, Request, RequestHeader, Response,
};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// One framed connection. Each side sends exactly one message.
pub struct NetworkConnection<S = TcpStream> {
    stream: S,
    read_timeout: Duration,
}

impl<S> NetworkConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, read_timeout: Duration) -> Self {
        Self {
            stream,
            read_timeout,
        }
    }

    async fn read_exact_timed(&mut self, buf: &mut [u8]) -> PineResult<()> {
        match tokio::time::timeout(self.read_timeout, self.stream.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(
                PineError::Connection("peer closed the connection mid-message".into()),
            ),
            Ok(Err(e)) => Err(PineError::Io(e)),
            Err(_) => Err(PineError::Timeout),
        }
    }

    /// Read a request. Content longer than `max_content_length` is refused
    /// before any of it is read.
    pub async fn read_request(&mut self, max_content_length: usize) -> PineResult<Request> {
        let mut raw = [0u8; REQUEST_HEADER_LEN];
        self.read_exact_timed(&mut raw).await?;
        let header = RequestHeader::decode(&raw)?;

        if header.content_length > max_content_length {
            return Err(PineError::RequestTooLarge(header.content_length));
        }

        let mut content = vec![0u8; header.content_length];
        self.read_exact_timed(&mut content).await?;
        let content = String::from_utf8(content)
            .map_err(|_| PineError::Protocol("request content is not valid UTF-8".into()))?;

        Ok(Request {
            request_type: header.request_type,
            content,
        })
    }

    pub async fn send_response(&mut self, response: &Response) -> PineResult<()> {
        self.stream.write_all(&response.encode()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Send a request (client side)
    pub async fn send_request(&mut self, request: &Request) -> PineResult<()> {
        self.stream.write_all(&request.encode()?).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read a response (client side)
    pub async fn read_response(&mut self) -> PineResult<Response> {
        let mut raw = [0u8; RESPONSE_HEADER_LEN];
        self.read_exact_timed(&mut raw).await?;
        let (code, len) = Response::decode_header(&raw)?;

        if len > MAX_RESPONSE_LENGTH {
            return Err(PineError::Protocol(format!("Response too large: {} bytes", len)));
        }

        let mut content = vec![0u8; len];
        self.read_exact_timed(&mut content).await?;
        let content = String::from_utf8(content)
            .map_err(|_| PineError::Protocol("response content is not valid UTF-8".into()))?;

        Ok(Response { code, content })
    }

    /// Close the connection gracefully
    pub async fn close(&mut self) -> PineResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
