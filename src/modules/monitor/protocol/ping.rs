use super::{frame, resolve, write_string, write_varint, Reader, MAX_PACKET};
use crate::modules::monitor::address::ServerAddress;
use crate::modules::monitor::query::{QueryError, Snapshot};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const PROTOCOL_VERSION: i32 = -1;
const NEXT_STATE_STATUS: i32 = 1;
const NIL_UUID: &str = "00000000-0000-0000-0000-000000000000";

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    players: Option<Players>,
    #[serde(default)]
    description: Option<Value>,
    #[serde(default)]
    favicon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Players {
    #[serde(default)]
    sample: Option<Vec<SamplePlayer>>,
}

#[derive(Debug, Deserialize)]
struct SamplePlayer {
    name: String,
    #[serde(default)]
    id: Option<String>,
}

pub async fn query(address: &ServerAddress) -> Result<Snapshot, QueryError> {
    let target = resolve(address).await?;
    let mut stream = TcpStream::connect(target).await?;

    let mut handshake = Vec::new();
    write_varint(&mut handshake, 0x00);
    write_varint(&mut handshake, PROTOCOL_VERSION);
    write_string(&mut handshake, &address.host);
    handshake.extend_from_slice(&address.port.to_be_bytes());
    write_varint(&mut handshake, NEXT_STATE_STATUS);

    let mut out = frame(&handshake);
    out.extend_from_slice(&frame(&[0x00]));
    stream.write_all(&out).await?;

    let body = read_packet(&mut stream).await?;
    let mut reader = Reader::new(&body);
    let id = reader.varint()?;
    if id != 0x00 {
        return Err(QueryError::protocol(format!(
            "unexpected packet id {id:#04x}"
        )));
    }
    let json = reader.string()?;
    parse_status(&json)
}

async fn read_varint<R: AsyncRead + Unpin>(stream: &mut R) -> Result<i32, QueryError> {
    let mut value: u32 = 0;
    for i in 0..5 {
        let b = stream.read_u8().await?;
        value |= ((b & 0x7f) as u32) << (7 * i);
        if b & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(QueryError::protocol("VarInt too long"))
}

async fn read_packet<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>, QueryError> {
    let len = read_varint(stream).await?;
    let len = usize::try_from(len)
        .ok()
        .filter(|&n| n > 0 && n <= MAX_PACKET)
        .ok_or_else(|| QueryError::protocol(format!("bad packet length {len}")))?;

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(body)
}

pub fn parse_status(json: &str) -> Result<Snapshot, QueryError> {
    let status: StatusResponse =
        serde_json::from_str(json).map_err(|e| QueryError::protocol(e.to_string()))?;

    let players = status
        .players
        .and_then(|p| p.sample)
        .unwrap_or_default()
        .into_iter()
        // Servers pad the hover list with fake entries carrying the nil UUID.
        .filter(|p| p.id.as_deref() != Some(NIL_UUID))
        .map(|p| p.name)
        .filter(|name| !name.is_empty())
        .collect();

    let name = status
        .description
        .as_ref()
        .map(plain_text)
        .filter(|s| !s.is_empty());

    let icon = status.favicon.as_deref().and_then(decode_favicon);

    Ok(Snapshot {
        players,
        name,
        icon,
    })
}

/// Flattens a chat component into one line of text without formatting codes.
pub fn plain_text(component: &Value) -> String {
    let mut raw = String::new();
    collect_text(component, &mut raw);
    strip_formatting(&raw)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn collect_text(component: &Value, out: &mut String) {
    match component {
        Value::String(s) => out.push_str(s),
        Value::Array(parts) => parts.iter().for_each(|p| collect_text(p, out)),
        Value::Object(map) => {
            if let Some(Value::String(text)) = map.get("text") {
                out.push_str(text);
            }
            if let Some(extra) = map.get("extra") {
                collect_text(extra, out);
            }
        }
        _ => {}
    }
}

fn strip_formatting(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '§' {
            chars.next();
        } else {
            out.push(c);
        }
    }
    out
}

fn decode_favicon(favicon: &str) -> Option<Vec<u8>> {
    let data = favicon.rsplit(',').next()?;
    match STANDARD.decode(data.trim()) {
        Ok(bytes) if !bytes.is_empty() => Some(bytes),
        Ok(_) => None,
        Err(e) => {
            debug!("Ignoring undecodable favicon: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn parses_sample_and_description() {
        let snapshot = parse_status(
            r#"{
                "version": {"name": "1.20.4", "protocol": 765},
                "players": {"max": 20, "online": 2, "sample": [
                    {"name": "alice", "id": "4566e69f-c907-48ee-8d71-d7ba5aa00d20"},
                    {"name": "bob", "id": "d2a8ff38-0b7a-4f4c-9d7b-7e5b23a1f9a2"}
                ]},
                "description": {"text": "§aHello ", "extra": [{"text": "World"}]}
            }"#,
        )
        .unwrap();

        assert_eq!(
            snapshot.players.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["alice", "bob"]
        );
        assert_eq!(snapshot.name.as_deref(), Some("Hello World"));
        assert!(snapshot.icon.is_none());
    }

    #[test]
    fn no_sample_means_empty_roster() {
        let snapshot =
            parse_status(r#"{"players": {"max": 20, "online": 0}, "description": ""}"#).unwrap();
        assert!(snapshot.players.is_empty());
        assert!(snapshot.name.is_none());
    }

    #[test]
    fn nil_uuid_entries_are_not_players() {
        let body = format!(
            r#"{{"players": {{"sample": [
                {{"name": "§6Welcome!", "id": "{NIL_UUID}"}},
                {{"name": "carol", "id": "x"}}
            ]}}}}"#
        );
        let snapshot = parse_status(&body).unwrap();
        assert_eq!(snapshot.players.len(), 1);
        assert!(snapshot.players.contains("carol"));
    }

    #[test]
    fn favicon_is_decoded() {
        let snapshot = parse_status(
            r#"{"description": "A Minecraft Server", "favicon": "data:image/png;base64,iVBORw0K"}"#,
        )
        .unwrap();
        assert_eq!(snapshot.icon.as_deref(), Some(&b"\x89PNG\r\n"[..]));
        assert_eq!(snapshot.name.as_deref(), Some("A Minecraft Server"));
    }

    #[test]
    fn garbage_json_is_a_protocol_error() {
        assert!(matches!(
            parse_status("not json"),
            Err(QueryError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn round_trip_against_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            let handshake = read_packet(&mut socket).await.unwrap();
            let mut r = Reader::new(&handshake);
            assert_eq!(r.varint().unwrap(), 0x00);
            assert_eq!(r.varint().unwrap(), PROTOCOL_VERSION);
            assert_eq!(r.string().unwrap(), "127.0.0.1");
            r.skip(2).unwrap();
            assert_eq!(r.varint().unwrap(), NEXT_STATE_STATUS);

            let request = read_packet(&mut socket).await.unwrap();
            assert_eq!(request, vec![0x00]);

            let mut body = Vec::new();
            write_varint(&mut body, 0x00);
            write_string(
                &mut body,
                r#"{"players":{"sample":[{"name":"alice","id":"1"}]},"description":"Survival"}"#,
            );
            socket.write_all(&frame(&body)).await.unwrap();
        });

        let snapshot = query(&ServerAddress::new("127.0.0.1", port)).await.unwrap();
        assert!(snapshot.players.contains("alice"));
        assert_eq!(snapshot.name.as_deref(), Some("Survival"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn closed_connection_is_a_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let err = query(&ServerAddress::new("127.0.0.1", port))
            .await
            .unwrap_err();
        assert!(
            matches!(err, QueryError::Protocol(_) | QueryError::Refused),
            "got {err:?}"
        );
    }
}
