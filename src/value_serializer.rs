use crate::error::Error;

/// Converts between caller values and the bytes stored on the server.
///
/// The client treats values as opaque: whatever `serialize` produces is
/// written verbatim and handed back to `deserialize` on retrieval. The
/// `*_raw` methods on the client bypass the serializer entirely.
pub trait ValueSerializer: Send + Sync {
    /// Encodes a value for transmission.
    fn serialize(&self, value: &[u8]) -> Result<Vec<u8>, Error>;

    /// Decodes bytes retrieved from the server.
    fn deserialize(&self, data: Vec<u8>) -> Result<Vec<u8>, Error>;
}

/// The default serializer: bytes pass through unchanged in both directions.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentitySerializer;

impl ValueSerializer for IdentitySerializer {
    fn serialize(&self, value: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(value.to_vec())
    }

    fn deserialize(&self, data: Vec<u8>) -> Result<Vec<u8>, Error> {
        Ok(data)
    }
}
