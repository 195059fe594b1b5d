use super::{resolve, Reader};
use crate::modules::monitor::address::ServerAddress;
use crate::modules::monitor::query::{QueryError, Snapshot};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

const MAGIC: [u8; 2] = [0xfe, 0xfd];
const TYPE_HANDSHAKE: u8 = 0x09;
const TYPE_STAT: u8 = 0x00;
// Only the low nibble of each byte is honoured by vanilla servers.
const SESSION_MASK: i32 = 0x0f0f_0f0f;
const KV_PADDING: usize = 11;
const PLAYER_PADDING: usize = 10;

pub async fn query(address: &ServerAddress) -> Result<Snapshot, QueryError> {
    let target = resolve(address).await?;
    let socket = bind_for(target).await?;
    // Connected so ICMP port-unreachable surfaces as ConnectionRefused.
    socket.connect(target).await?;

    let session = session_id();
    socket.send(&handshake_request(session)).await?;
    let token = parse_handshake(&recv(&socket).await?, session)?;

    socket.send(&stat_request(session, token)).await?;
    parse_stat(&recv(&socket).await?, session)
}

async fn bind_for(target: SocketAddr) -> Result<UdpSocket, QueryError> {
    let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    Ok(UdpSocket::bind(local).await?)
}

async fn recv(socket: &UdpSocket) -> Result<Vec<u8>, QueryError> {
    let mut buf = vec![0u8; 65_535];
    let n = socket.recv(&mut buf).await?;
    buf.truncate(n);
    Ok(buf)
}

fn session_id() -> i32 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(1);
    (nanos as i32) & SESSION_MASK
}

pub fn handshake_request(session: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(7);
    out.extend_from_slice(&MAGIC);
    out.push(TYPE_HANDSHAKE);
    out.extend_from_slice(&session.to_be_bytes());
    out
}

pub fn stat_request(session: i32, token: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(15);
    out.extend_from_slice(&MAGIC);
    out.push(TYPE_STAT);
    out.extend_from_slice(&session.to_be_bytes());
    out.extend_from_slice(&token.to_be_bytes());
    // Four bytes of padding select the full stat instead of the basic one.
    out.extend_from_slice(&[0, 0, 0, 0]);
    out
}

fn expect_header(r: &mut Reader<'_>, kind: u8, session: i32) -> Result<(), QueryError> {
    let got = r.u8()?;
    if got != kind {
        return Err(QueryError::protocol(format!("unexpected packet type {got:#04x}")));
    }
    let got = r.i32_be()?;
    if got != session {
        return Err(QueryError::protocol("session id mismatch"));
    }
    Ok(())
}

pub fn parse_handshake(packet: &[u8], session: i32) -> Result<i32, QueryError> {
    let mut r = Reader::new(packet);
    expect_header(&mut r, TYPE_HANDSHAKE, session)?;
    let token = r.cstring()?;
    token
        .trim()
        .parse::<i64>()
        .map(|t| t as i32)
        .map_err(|_| QueryError::protocol(format!("bad challenge token {token:?}")))
}

pub fn parse_stat(packet: &[u8], session: i32) -> Result<Snapshot, QueryError> {
    let mut r = Reader::new(packet);
    expect_header(&mut r, TYPE_STAT, session)?;
    r.skip(KV_PADDING)?;

    let mut name = None;
    loop {
        let key = r.cstring()?;
        if key.is_empty() {
            break;
        }
        let value = r.cstring()?;
        if key == "hostname" {
            name = Some(value);
        }
    }

    r.skip(PLAYER_PADDING)?;
    let mut players = BTreeSet::new();
    loop {
        let player = r.cstring()?;
        if player.is_empty() {
            break;
        }
        players.insert(player);
    }

    Ok(Snapshot {
        players,
        name: name
            .map(|n| n.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|n| !n.is_empty()),
        icon: None,
    })
}
