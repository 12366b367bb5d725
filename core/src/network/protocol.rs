//! Wire format
//!
//! Request:  `[type: u16][content length: u16][content]`
//! Response: `[code: u16][content length: u32][content]`
//!
//! All integers are big-endian and content is UTF-8. QUERY content is a JSON
//! [`Query`]; successful query responses carry a JSON [`QueryOutput`], failed
//! ones a JSON [`ErrorBody`].

use crate::error::{ErrorKind, PineError, PineResult};
use crate::query::{Query, QueryOutput};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

pub const REQUEST_HEADER_LEN: usize = 4;
pub const RESPONSE_HEADER_LEN: usize = 6;

/// Default cap on request content, in bytes
pub const MAX_CONTENT_LENGTH: usize = 10 * 1024;

/// Cap on response content a client is willing to buffer
pub const MAX_RESPONSE_LENGTH: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RequestType {
    Ping = 1,
    Query = 2,
}

impl TryFrom<u16> for RequestType {
    type Error = PineError;

    fn try_from(value: u16) -> PineResult<Self> {
        match value {
            1 => Ok(RequestType::Ping),
            2 => Ok(RequestType::Query),
            other => Err(PineError::Protocol(format!("unknown request type {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ResponseCode {
    Success = 1,
    InvalidRequest = 2,
    ServerError = 3,
    TooManyRequests = 4,
    QueryError = 5,
    InternalError = 6,
}

impl TryFrom<u16> for ResponseCode {
    type Error = PineError;

    fn try_from(value: u16) -> PineResult<Self> {
        let code = match value {
            1 => ResponseCode::Success,
            2 => ResponseCode::InvalidRequest,
            3 => ResponseCode::ServerError,
            4 => ResponseCode::TooManyRequests,
            5 => ResponseCode::QueryError,
            6 => ResponseCode::InternalError,
            other => return Err(PineError::Protocol(format!("unknown response code {}", other))),
        };
        Ok(code)
    }
}

impl From<&PineError> for ResponseCode {
    fn from(error: &PineError) -> Self {
        match error {
            PineError::Protocol(_) | PineError::RequestTooLarge(_) => ResponseCode::InvalidRequest,
            PineError::TooManyRequests => ResponseCode::TooManyRequests,
            PineError::DuplicateKey(_)
            | PineError::Validation { .. }
            | PineError::TableNotFound(_)
            | PineError::TableExists(_)
            | PineError::InvalidInput(_)
            | PineError::Serialization(_) => ResponseCode::QueryError,
            PineError::Io(_)
            | PineError::CorruptMetadata { .. }
            | PineError::Connection(_)
            | PineError::Timeout => ResponseCode::ServerError,
            PineError::Internal(_) => ResponseCode::InternalError,
        }
    }
}

/// Error payload of a non-success response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

/// Fixed-size request prefix, decoded before any content is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub request_type: RequestType,
    pub content_length: usize,
}

impl RequestHeader {
    pub fn decode(mut raw: &[u8]) -> PineResult<Self> {
        if raw.len() < REQUEST_HEADER_LEN {
            return Err(PineError::Protocol("truncated request header".into()));
        }
        let request_type = RequestType::try_from(raw.get_u16())?;
        let content_length = raw.get_u16() as usize;
        Ok(Self {
            request_type,
            content_length,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub request_type: RequestType,
    pub content: String,
}

impl Request {
    pub fn ping() -> Self {
        Self {
            request_type: RequestType::Ping,
            content: String::new(),
        }
    }

    pub fn query(query: &Query) -> PineResult<Self> {
        Ok(Self {
            request_type: RequestType::Query,
            content: serde_json::to_string(query)?,
        })
    }

    /// Parse the QUERY payload.
    pub fn parse_query(&self) -> PineResult<Query> {
        serde_json::from_str(&self.content)
            .map_err(|e| PineError::Serialization(format!("invalid query: {}", e)))
    }

    pub fn encode(&self) -> PineResult<Bytes> {
        let len = u16::try_from(self.content.len())
            .map_err(|_| PineError::RequestTooLarge(self.content.len()))?;

        let mut buf = BytesMut::with_capacity(REQUEST_HEADER_LEN + self.content.len());
        buf.put_u16(self.request_type as u16);
        buf.put_u16(len);
        buf.put_slice(self.content.as_bytes());
        Ok(buf.freeze())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: ResponseCode,
    pub content: String,
}

impl Response {
    pub fn new(code: ResponseCode, content: impl Into<String>) -> Self {
        Self {
            code,
            content: content.into(),
        }
    }

    pub fn pong() -> Self {
        Self::new(ResponseCode::Success, "PONG")
    }

    pub fn output(output: &QueryOutput) -> Self {
        match serde_json::to_string(output) {
            Ok(json) => Self::new(ResponseCode::Success, json),
            Err(e) => Self::error(&PineError::Internal(format!("failed to encode output: {}", e))),
        }
    }

    pub fn error(error: &PineError) -> Self {
        let body = ErrorBody {
            kind: error.kind(),
            message: error.to_string(),
        };
        let content = serde_json::to_string(&body).unwrap_or_else(|_| body.message.clone());
        Self::new(ResponseCode::from(error), content)
    }

    pub fn is_success(&self) -> bool {
        self.code == ResponseCode::Success
    }

    /// Decode the content of a failed response.
    pub fn error_body(&self) -> Option<ErrorBody> {
        if self.is_success() {
            return None;
        }
        Some(serde_json::from_str(&self.content).unwrap_or_else(|_| ErrorBody {
            kind: ErrorKind::Internal,
            message: self.content.clone(),
        }))
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RESPONSE_HEADER_LEN + self.content.len());
        buf.put_u16(self.code as u16);
        buf.put_u32(self.content.len() as u32);
        buf.put_slice(self.content.as_bytes());
        buf.freeze()
    }

    /// Decode `[code][length]`.
    pub fn decode_header(mut raw: &[u8]) -> PineResult<(ResponseCode, usize)> {
        if raw.len() < RESPONSE_HEADER_LEN {
            return Err(PineError::Protocol("truncated response header".into()));
        }
        let code = ResponseCode::try_from(raw.get_u16())?;
        let len = raw.get_u32() as usize;
        Ok((code, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ping_frame() {
        let frame = Request::ping().encode().unwrap();
        assert_eq!(&frame[..], &[0, 1, 0, 0]);
    }

    #[test]
    fn test_request_header_roundtrip() {
        let request = Request::query(&Query::ListTables).unwrap();
        let frame = request.encode().unwrap();

        let header = RequestHeader::decode(&frame[..REQUEST_HEADER_LEN]).unwrap();
        assert_eq!(header.request_type, RequestType::Query);
        assert_eq!(header.content_length, request.content.len());
        assert_eq!(&frame[REQUEST_HEADER_LEN..], request.content.as_bytes());
    }

    #[test]
    fn test_unknown_request_type() {
        assert!(matches!(
            RequestHeader::decode(&[0, 9, 0, 0]),
            Err(PineError::Protocol(_))
        ));
    }

    #[test]
    fn test_oversized_request_refuses_to_encode() {
        let request = Request {
            request_type: RequestType::Query,
            content: "x".repeat(70_000),
        };
        assert!(matches!(request.encode(), Err(PineError::RequestTooLarge(70_000))));
    }

    #[test]
    fn test_response_frame() {
        let frame = Response::pong().encode();
        assert_eq!(&frame[..], &[0, 1, 0, 0, 0, 4, b'P', b'O', b'N', b'G']);

        let (code, len) = Response::decode_header(&frame).unwrap();
        assert_eq!(code, ResponseCode::Success);
        assert_eq!(len, 4);
    }

    #[test]
    fn test_error_codes() {
        let cases = [
            (PineError::RequestTooLarge(1), ResponseCode::InvalidRequest),
            (PineError::TooManyRequests, ResponseCode::TooManyRequests),
            (PineError::TableNotFound("t".into()), ResponseCode::QueryError),
            (PineError::validation("c", "bad"), ResponseCode::QueryError),
            (PineError::Timeout, ResponseCode::ServerError),
            (PineError::Internal("boom".into()), ResponseCode::InternalError),
        ];
        for (error, code) in cases {
            assert_eq!(ResponseCode::from(&error), code, "{}", error);
        }
    }

    #[test]
    fn test_error_response_body() {
        let response = Response::error(&PineError::TableNotFound("ghost".into()));

        assert_eq!(response.code, ResponseCode::QueryError);
        let body = response.error_body().unwrap();
        assert_eq!(body.kind, ErrorKind::TableNotFound);
        assert!(body.message.contains("ghost"));
        assert_eq!(Response::pong().error_body(), None);
    }
}
