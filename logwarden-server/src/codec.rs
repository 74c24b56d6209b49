use std::io;

use tokio_util::bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Newline-delimited frame codec for the ingest listener.
///
/// CRLF is canonical on the wire; a bare LF is tolerated. There is no
/// length prefix, so a frame larger than `max_length` is treated as a
/// protocol error and drops the connection.
#[derive(Debug, Clone, Copy)]
pub struct LineCodec {
    max_length: usize,
}

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }
}

impl Decoder for LineCodec {
    type Item = Vec<u8>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                let mut line = src.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                Ok(Some(line.to_vec()))
            }
            None if src.len() > self.max_length => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame exceeds maximum length of {} bytes", self.max_length),
            )),
            None => Ok(None),
        }
    }
}

impl Encoder<&[u8]> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 2);
        dst.put_slice(item);
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_crlf_and_bare_lf_frames() {
        let mut codec = LineCodec::new(1024);
        let mut buf = BytesMut::from(&b"first\r\nsecond\nthird"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(b"first".to_vec()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(b"second".to_vec()));
        // "third" has no terminator yet
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.put_slice(b"\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(b"third".to_vec()));
    }

    #[test]
    fn oversize_frames_error() {
        let mut codec = LineCodec::new(8);
        let mut buf = BytesMut::from(&b"way past the configured limit"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn empty_frames_decode_to_empty_payloads() {
        let mut codec = LineCodec::new(1024);
        let mut buf = BytesMut::from(&b"\r\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn encoder_appends_crlf() {
        let mut codec = LineCodec::new(1024);
        let mut buf = BytesMut::new();
        codec.encode(b"payload", &mut buf).unwrap();
        assert_eq!(&buf[..], b"payload\r\n");
    }
}
