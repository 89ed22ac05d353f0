use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Largest frame accepted from the control socket
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;
// "1048576:" is the longest valid header
const MAX_HEADER_LEN: usize = 8;

/// Netstring framing (`<len>:<payload>,`) used by the baresip ctrl_tcp module.
#[derive(Debug, Default)]
pub struct NetstringCodec {
    // payload length of the frame being read, once its header was consumed
    pending: Option<usize>,
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

impl Decoder for NetstringCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let len = match self.pending {
            Some(len) => len,
            None => {
                let Some(colon) = src.iter().take(MAX_HEADER_LEN + 1).position(|b| *b == b':')
                else {
                    if src.len() > MAX_HEADER_LEN {
                        return Err(invalid("netstring header too long".to_string()));
                    }
                    return Ok(None);
                };
                let header = &src[..colon];
                if header.is_empty() || !header.iter().all(u8::is_ascii_digit) {
                    return Err(invalid(format!(
                        "bad netstring length: {:?}",
                        String::from_utf8_lossy(header)
                    )));
                }
                let len: usize = std::str::from_utf8(header)
                    .map_err(|e| invalid(e.to_string()))?
                    .parse()
                    .map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?;
                if len > MAX_FRAME_SIZE {
                    return Err(invalid(format!("netstring frame too large: {}", len)));
                }
                src.advance(colon + 1);
                self.pending = Some(len);
                len
            }
        };

        if src.len() < len + 1 {
            src.reserve(len + 1 - src.len());
            return Ok(None);
        }
        let payload = src.split_to(len);
        let terminator = src.get_u8();
        self.pending = None;
        if terminator != b',' {
            return Err(invalid(format!(
                "netstring missing trailing comma, found {:#04x}",
                terminator
            )));
        }
        Ok(Some(payload))
    }
}

impl Encoder<Bytes> for NetstringCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > MAX_FRAME_SIZE {
            return Err(invalid(format!("netstring frame too large: {}", item.len())));
        }
        let header = format!("{}:", item.len());
        dst.reserve(header.len() + item.len() + 1);
        dst.put_slice(header.as_bytes());
        dst.put_slice(&item);
        dst.put_u8(b',');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        let mut codec = NetstringCodec::default();
        let mut dst = BytesMut::new();
        codec
            .encode(Bytes::from_static(b"hello world!"), &mut dst)
            .unwrap();
        assert_eq!(&dst[..], b"12:hello world!,");
    }

    #[test]
    fn test_decode_partial_frames() {
        let mut codec = NetstringCodec::default();
        let mut src = BytesMut::from(&b"5:he"[..]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(b"llo,3:ab");
        assert_eq!(&codec.decode(&mut src).unwrap().unwrap()[..], b"hello");
        assert!(codec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(b"c,");
        assert_eq!(&codec.decode(&mut src).unwrap().unwrap()[..], b"abc");
        assert!(src.is_empty());
    }

    #[test]
    fn test_decode_empty_payload() {
        let mut codec = NetstringCodec::default();
        let mut src = BytesMut::from(&b"0:,"[..]);
        assert!(codec.decode(&mut src).unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let mut codec = NetstringCodec::default();
        let mut src = BytesMut::from(&b"x2:ab,"[..]);
        assert!(codec.decode(&mut src).is_err());

        let mut codec = NetstringCodec::default();
        let mut src = BytesMut::from(&b"2:ab;"[..]);
        assert!(codec.decode(&mut src).is_err());

        let mut codec = NetstringCodec::default();
        let mut src = BytesMut::from(&b"123456789012"[..]);
        assert!(codec.decode(&mut src).is_err());
    }
}
