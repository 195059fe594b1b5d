//! Wire formats for the two ways of asking a Minecraft server who is online.
//!
//! `ping` speaks the TCP Server List Ping, `full` the GameSpy4 UDP query. Both
//! resolve the address themselves and leave the overall deadline to the caller.

pub mod full;
pub mod ping;

use super::address::ServerAddress;
use super::query::QueryError;
use std::net::SocketAddr;
use tokio::net::lookup_host;

/// Largest packet we accept from a server; real status responses are a few KiB
/// plus the favicon.
pub const MAX_PACKET: usize = 2 * 1024 * 1024;

pub async fn resolve(address: &ServerAddress) -> Result<SocketAddr, QueryError> {
    lookup_host(address.socket_target())
        .await
        .map_err(QueryError::Transport)?
        .next()
        .ok_or_else(|| {
            QueryError::Transport(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no addresses for {}", address.host),
            ))
        })
}

pub fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7f == 0 {
            buf.push(value as u8);
            return;
        }
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
}

pub fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_varint(buf, value.len() as i32);
    buf.extend_from_slice(value.as_bytes());
}

pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 5);
    write_varint(&mut out, body.len() as i32);
    out.extend_from_slice(body);
    out
}

/// Cursor over a received packet body.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn skip(&mut self, n: usize) -> Result<(), QueryError> {
        if self.buf.len() - self.pos < n {
            return Err(QueryError::protocol("packet truncated"));
        }
        self.pos += n;
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, QueryError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| QueryError::protocol("packet truncated"))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn i32_be(&mut self) -> Result<i32, QueryError> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| QueryError::protocol("packet truncated"))?;
        self.pos += 4;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn varint(&mut self) -> Result<i32, QueryError> {
        let mut value: u32 = 0;
        for i in 0..5 {
            let b = self.u8()?;
            value |= ((b & 0x7f) as u32) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(value as i32);
            }
        }
        Err(QueryError::protocol("VarInt too long"))
    }

    pub fn string(&mut self) -> Result<String, QueryError> {
        let len = usize::try_from(self.varint()?)
            .map_err(|_| QueryError::protocol("negative string length"))?;
        let start = self.pos;
        self.skip(len)?;
        String::from_utf8(self.buf[start..self.pos].to_vec())
            .map_err(|_| QueryError::protocol("string is not UTF-8"))
    }

    /// NUL-terminated string, lossily decoded (query responses are Latin-1 in practice).
    pub fn cstring(&mut self) -> Result<String, QueryError> {
        let rest = self.remaining();
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| QueryError::protocol("unterminated string"))?;
        let s = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_known_encodings() {
        let cases: &[(i32, &[u8])] = &[
            (0, &[0x00]),
            (1, &[0x01]),
            (127, &[0x7f]),
            (128, &[0x80, 0x01]),
            (25565, &[0xdd, 0xc7, 0x01]),
            (-1, &[0xff, 0xff, 0xff, 0xff, 0x0f]),
        ];
        for (value, bytes) in cases {
            let mut buf = Vec::new();
            write_varint(&mut buf, *value);
            assert_eq!(&buf[..], *bytes, "encoding {value}");
            assert_eq!(Reader::new(bytes).varint().unwrap(), *value);
        }
    }

    #[test]
    fn overlong_varint_is_rejected() {
        let bytes = [0xff, 0xff, 0xff, 0xff, 0xff, 0x01];
        assert!(matches!(
            Reader::new(&bytes).varint(),
            Err(QueryError::Protocol(_))
        ));
    }

    #[test]
    fn cstrings_and_truncation() {
        let mut r = Reader::new(b"abc\0de\0f");
        assert_eq!(r.cstring().unwrap(), "abc");
        assert_eq!(r.cstring().unwrap(), "de");
        assert!(r.cstring().is_err());
        assert!(r.skip(5).is_err());
    }
}
