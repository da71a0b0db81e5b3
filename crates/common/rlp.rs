//! Minimal RLP encoding, used for deterministic header hashing of simulated
//! blocks. Only the encode side exists; nothing in this engine decodes RLP.

use bytes::{BufMut, Bytes};
use ethereum_types::{H160, H256, U256};

/// First byte of the RLP encoding of an empty byte string.
pub const RLP_NULL: u8 = 0x80;

/// First byte of the RLP encoding of an empty list.
pub const RLP_EMPTY_LIST: u8 = 0xc0;

pub trait RLPEncode {
    fn encode(&self, buf: &mut dyn BufMut);

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

/// Writes the RLP list prefix for a payload of the given length.
pub fn encode_length(payload_len: usize, buf: &mut dyn BufMut) {
    if payload_len < 56 {
        buf.put_u8(RLP_EMPTY_LIST + payload_len as u8);
    } else {
        let bytes = payload_len.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        buf.put_u8(0xf7 + (bytes.len() - skip) as u8);
        buf.put_slice(&bytes[skip..]);
    }
}

fn encode_bytes(bytes: &[u8], buf: &mut dyn BufMut) {
    if bytes.len() == 1 && bytes[0] < RLP_NULL {
        buf.put_u8(bytes[0]);
    } else if bytes.len() < 56 {
        buf.put_u8(RLP_NULL + bytes.len() as u8);
        buf.put_slice(bytes);
    } else {
        let len_bytes = bytes.len().to_be_bytes();
        let skip = len_bytes.iter().take_while(|&&b| b == 0).count();
        buf.put_u8(0xb7 + (len_bytes.len() - skip) as u8);
        buf.put_slice(&len_bytes[skip..]);
        buf.put_slice(bytes);
    }
}

impl RLPEncode for bool {
    fn encode(&self, buf: &mut dyn BufMut) {
        if *self {
            buf.put_u8(0x01);
        } else {
            buf.put_u8(RLP_NULL);
        }
    }
}

impl RLPEncode for u8 {
    fn encode(&self, buf: &mut dyn BufMut) {
        u64::from(*self).encode(buf);
    }
}

impl RLPEncode for u64 {
    fn encode(&self, buf: &mut dyn BufMut) {
        let bytes = self.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        encode_bytes(&bytes[skip..], buf);
    }
}

impl RLPEncode for usize {
    fn encode(&self, buf: &mut dyn BufMut) {
        (*self as u64).encode(buf);
    }
}

impl RLPEncode for U256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        let bytes = self.to_big_endian();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        encode_bytes(&bytes[skip..], buf);
    }
}

impl RLPEncode for H256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_bytes(), buf);
    }
}

impl RLPEncode for H160 {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_bytes(), buf);
    }
}

impl RLPEncode for Bytes {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self, buf);
    }
}

impl RLPEncode for [u8] {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self, buf);
    }
}

impl<const N: usize> RLPEncode for [u8; N] {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_ref(), buf);
    }
}

impl<T: RLPEncode> RLPEncode for Vec<T> {
    fn encode(&self, buf: &mut dyn BufMut) {
        let mut payload = Vec::new();
        for item in self {
            item.encode(&mut payload);
        }
        encode_length(payload.len(), buf);
        buf.put_slice(&payload);
    }
}

impl<T: RLPEncode> RLPEncode for &T {
    fn encode(&self, buf: &mut dyn BufMut) {
        (**self).encode(buf);
    }
}

/// # Struct encoding helper
///
/// Encodes a struct as an RLP list. Fields are buffered in encoding order via
/// [`Encoder::encode_field`], then the list prefix is emitted on
/// [`Encoder::finish`].
#[must_use = "`Encoder` must be consumed with `finish` to write the encoding"]
pub struct Encoder<'a> {
    buf: &'a mut dyn BufMut,
    temp_buf: Vec<u8>,
}

impl<'a> Encoder<'a> {
    pub fn new(buf: &'a mut dyn BufMut) -> Self {
        Self {
            buf,
            temp_buf: Vec::new(),
        }
    }

    /// Stores a field to be encoded.
    pub fn encode_field<T: RLPEncode>(mut self, value: &T) -> Self {
        value.encode(&mut self.temp_buf);
        self
    }

    /// If `Some`, stores a field to be encoded, else does nothing.
    pub fn encode_optional_field<T: RLPEncode>(self, opt_value: &Option<T>) -> Self {
        match opt_value {
            Some(value) => self.encode_field(value),
            None => self,
        }
    }

    /// Finishes encoding the struct and writes the result to the buffer.
    pub fn finish(self) {
        encode_length(self.temp_buf.len(), self.buf);
        self.buf.put_slice(&self.temp_buf);
    }
}
