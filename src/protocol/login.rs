use bytes::BytesMut;

use crate::protocol::primitives::{read_str, write_str};
use crate::AppResult;

/// Body of the first control frame on a new connection: the client's
/// protocol/compression preference. No application request is accepted
/// before this exchange completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub protocol: String,
    pub zip_name: String,
}

impl LoginRequest {
    pub fn new(protocol: &str, zip_name: &str) -> Self {
        LoginRequest {
            protocol: protocol.to_string(),
            zip_name: zip_name.to_string(),
        }
    }

    pub fn write_to(&self, buffer: &mut BytesMut) {
        write_str(buffer, &self.protocol);
        write_str(buffer, &self.zip_name);
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buffer = BytesMut::new();
        self.write_to(&mut buffer);
        buffer
    }

    pub fn read_from(buffer: &mut BytesMut) -> AppResult<LoginRequest> {
        Ok(LoginRequest {
            protocol: read_str(buffer)?,
            zip_name: read_str(buffer)?,
        })
    }
}

/// Body of a successful login response, echoing what the server accepted.
/// The connection records these as its negotiated parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResponse {
    pub protocol: String,
    pub zip_name: String,
}

impl LoginResponse {
    pub fn new(protocol: &str, zip_name: &str) -> Self {
        LoginResponse {
            protocol: protocol.to_string(),
            zip_name: zip_name.to_string(),
        }
    }

    pub fn write_to(&self, buffer: &mut BytesMut) {
        write_str(buffer, &self.protocol);
        write_str(buffer, &self.zip_name);
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buffer = BytesMut::new();
        self.write_to(&mut buffer);
        buffer
    }

    pub fn read_from(buffer: &mut BytesMut) -> AppResult<LoginResponse> {
        Ok(LoginResponse {
            protocol: read_str(buffer)?,
            zip_name: read_str(buffer)?,
        })
    }
}
