//! HTTP tracker client
//!
//! Announces the torrent to its tracker and decodes the peer list from the
//! bencoded response.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::bencode::{self, BencodeValue};
use crate::error::{Result, TorrentError};
use crate::torrent::TorrentInfo;

/// Default port we report to trackers
pub const DEFAULT_PORT: u16 = 6881;

/// Default HTTP timeout for an announce
pub const DEFAULT_TRACKER_TIMEOUT: Duration = Duration::from_secs(15);

/// Size of one compact peer record: IPv4 address and big-endian port
const COMPACT_PEER_LEN: usize = 6;

/// Decoded announce response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceResponse {
    /// Seconds the tracker wants between announces
    pub interval: Duration,
    /// Peers serving the torrent
    pub peers: Vec<SocketAddrV4>,
}

impl AnnounceResponse {
    /// Parse a bencoded tracker response body
    pub fn parse(body: &[u8]) -> Result<Self> {
        let root = bencode::decode_all(body).map_err(|e| {
            TorrentError::TrackerProtocolError(format!("response is not valid bencode: {}", e))
        })?;
        if root.as_dict().is_none() {
            return Err(TorrentError::TrackerProtocolError(format!(
                "response is a {}, expected a dictionary",
                root.type_name()
            )));
        }

        if let Some(reason) = root.get(b"failure reason") {
            let reason = reason
                .as_bytes()
                .map(|r| String::from_utf8_lossy(r).into_owned())
                .unwrap_or_else(|| "unspecified failure".to_string());
            warn!("Tracker refused announce: {}", reason);
            return Err(TorrentError::TrackerProtocolError(reason));
        }

        let interval = root
            .get(b"interval")
            .and_then(BencodeValue::as_integer)
            .ok_or_else(|| TorrentError::TrackerProtocolError("missing integer 'interval'".to_string()))?;
        let interval = u64::try_from(interval)
            .map_err(|_| TorrentError::TrackerProtocolError(format!("negative interval {}", interval)))?;

        let peers = match root.get(b"peers") {
            Some(BencodeValue::Bytes(compact)) => parse_compact_peers(compact)?,
            Some(BencodeValue::List(entries)) => parse_peer_dicts(entries),
            Some(other) => {
                return Err(TorrentError::TrackerProtocolError(format!(
                    "'peers' is a {}",
                    other.type_name()
                )))
            }
            None => return Err(TorrentError::TrackerProtocolError("missing 'peers'".to_string())),
        };

        Ok(Self {
            interval: Duration::from_secs(interval),
            peers,
        })
    }
}

/// Split the compact peer string into addresses
pub fn parse_compact_peers(data: &[u8]) -> Result<Vec<SocketAddrV4>> {
    if data.len() % COMPACT_PEER_LEN != 0 {
        return Err(TorrentError::TrackerProtocolError(format!(
            "compact peers length {} is not a multiple of {}",
            data.len(),
            COMPACT_PEER_LEN
        )));
    }

    Ok(data
        .chunks_exact(COMPACT_PEER_LEN)
        .map(|record| {
            let ip = Ipv4Addr::new(record[0], record[1], record[2], record[3]);
            let port = u16::from_be_bytes([record[4], record[5]]);
            SocketAddrV4::new(ip, port)
        })
        .collect())
}

/// Non-compact form: a list of `{ip, port}` dictionaries; non-IPv4 entries are skipped
fn parse_peer_dicts(entries: &[BencodeValue]) -> Vec<SocketAddrV4> {
    entries
        .iter()
        .filter_map(|entry| {
            let ip = entry.get(b"ip")?.as_str()?.parse::<Ipv4Addr>().ok();
            let port = entry.get(b"port")?.as_integer().and_then(|p| u16::try_from(p).ok());
            match (ip, port) {
                (Some(ip), Some(port)) => Some(SocketAddrV4::new(ip, port)),
                _ => {
                    debug!("Skipping unusable peer entry {:?}", entry.to_json());
                    None
                }
            }
        })
        .collect()
}

/// Client for a torrent's HTTP tracker
#[derive(Debug, Clone)]
pub struct TrackerClient {
    client: reqwest::Client,
    peer_id: [u8; 20],
    port: u16,
}

impl TrackerClient {
    /// Create a client announcing `peer_id` on `port`
    pub fn new(peer_id: [u8; 20], port: u16, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TorrentError::config("tracker_timeout", e.to_string()))?;
        Ok(Self { client, peer_id, port })
    }

    /// Build the announce URL with every query parameter
    ///
    /// The info hash and peer id are raw bytes, so they are percent-encoded by
    /// hand rather than through a UTF-8 query serializer.
    pub fn announce_url(&self, torrent: &TorrentInfo) -> Result<String> {
        let base = Url::parse(&torrent.announce).map_err(|e| {
            TorrentError::TrackerProtocolError(format!("invalid announce URL '{}': {}", torrent.announce, e))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(TorrentError::TrackerProtocolError(format!(
                "unsupported tracker scheme '{}'",
                base.scheme()
            )));
        }

        let separator = if base.query().is_some() { '&' } else { '?' };
        Ok(format!(
            "{}{}info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1",
            base,
            separator,
            urlencoding::encode_binary(&torrent.info_hash),
            urlencoding::encode_binary(&self.peer_id),
            self.port,
            torrent.length
        ))
    }

    /// Announce once and return the tracker's peer list
    pub async fn announce(&self, torrent: &TorrentInfo) -> Result<AnnounceResponse> {
        let url = self.announce_url(torrent)?;
        info!("Announcing to tracker: {}", torrent.announce);
        trace!("Announce URL: {}", url);

        let unreachable = |source: reqwest::Error| {
            error!("Tracker request to {} failed: {}", torrent.announce, source);
            TorrentError::TrackerUnreachable {
                url: torrent.announce.clone(),
                source,
            }
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(unreachable)?
            .error_for_status()
            .map_err(unreachable)?;
        let body = response.bytes().await.map_err(unreachable)?;
        debug!("Tracker answered with {} bytes", body.len());

        let announce = AnnounceResponse::parse(&body)?;
        info!(
            "Tracker returned {} peers (interval {}s)",
            announce.peers.len(),
            announce.interval.as_secs()
        );
        Ok(announce)
    }

    /// Announce, retrying unreachable trackers with exponential backoff
    ///
    /// Only transport failures are retried; a tracker that answers with an
    /// error is not asked again.
    pub async fn announce_with_retry(
        &self,
        torrent: &TorrentInfo,
        attempts: u32,
        backoff: Duration,
    ) -> Result<AnnounceResponse> {
        let attempts = attempts.max(1);
        let mut delay = backoff;
        let mut attempt = 1;
        loop {
            match self.announce(torrent).await {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!("Announce attempt {}/{} failed: {}; retrying in {:?}", attempt, attempts, e, delay);
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn torrent(announce: &str) -> TorrentInfo {
        TorrentInfo {
            announce: announce.to_string(),
            info_hash: [0xab; 20],
            piece_length: 32768,
            pieces: vec![[0u8; 20]; 3],
            name: "sample.txt".to_string(),
            length: 92063,
        }
    }

    /// Serve one HTTP response; the request line is sent back through the handle
    async fn http_responder(status: &'static str, body: Vec<u8>) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/announce", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&body).await.unwrap();
            socket.shutdown().await.unwrap();

            String::from_utf8_lossy(&request).lines().next().unwrap_or_default().to_string()
        });
        (url, handle)
    }

    fn client() -> TrackerClient {
        TrackerClient::new([0x2d; 20], 6881, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_parse_compact_peers() {
        let data = [165, 232, 33, 77, 0xc8, 0xd5, 10, 0, 0, 1, 0x1a, 0xe1];
        let peers = parse_compact_peers(&data).unwrap();
        let rendered: Vec<String> = peers.iter().map(|p| p.to_string()).collect();
        assert_eq!(rendered, vec!["165.232.33.77:51413", "10.0.0.1:6881"]);
    }

    #[test]
    fn test_parse_compact_peers_bad_length() {
        let err = parse_compact_peers(&[1, 2, 3, 4, 5]).unwrap_err();
        assert!(matches!(err, TorrentError::TrackerProtocolError(_)));
        assert!(parse_compact_peers(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_parse_response() {
        let body = b"d8:intervali60e5:peers6:\x7f\x00\x00\x01\x1a\xe1e";
        let response = AnnounceResponse::parse(body).unwrap();
        assert_eq!(response.interval, Duration::from_secs(60));
        assert_eq!(response.peers, vec!["127.0.0.1:6881".parse().unwrap()]);
    }

    #[test]
    fn test_parse_dictionary_peers() {
        let body = b"d8:intervali30e5:peersld2:ip8:10.0.0.24:porti51413eed2:ip7:::1:bad4:porti1eeee";
        let response = AnnounceResponse::parse(body).unwrap();
        assert_eq!(response.peers, vec!["10.0.0.2:51413".parse().unwrap()]);
    }

    #[test]
    fn test_parse_response_errors() {
        let failure = AnnounceResponse::parse(b"d14:failure reason12:unregisterede").unwrap_err();
        match failure {
            TorrentError::TrackerProtocolError(reason) => assert_eq!(reason, "unregistered"),
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(AnnounceResponse::parse(b"d5:peers0:e").is_err());
        assert!(AnnounceResponse::parse(b"d8:intervali60ee").is_err());
        assert!(AnnounceResponse::parse(b"li1ee").is_err());
        assert!(AnnounceResponse::parse(b"<html>").is_err());
    }

    #[test]
    fn test_announce_url() {
        let url = client().announce_url(&torrent("http://tracker.example.com/announce")).unwrap();
        let encoded_hash = "%ab".repeat(20);
        assert!(url.to_lowercase().contains(&format!("info_hash={}", encoded_hash)));
        assert!(url.contains(&format!("peer_id={}", "-".repeat(20))));
        assert!(url.contains("port=6881"));
        assert!(url.contains("left=92063"));
        assert!(url.contains("compact=1"));

        let with_query = client().announce_url(&torrent("http://tracker.example.com/announce?key=1")).unwrap();
        assert!(with_query.contains("?key=1&info_hash="));

        assert!(client().announce_url(&torrent("udp://tracker.example.com:80")).is_err());
        assert!(client().announce_url(&torrent("not a url")).is_err());
    }

    #[tokio::test]
    async fn test_announce_against_local_tracker() {
        let body = b"d8:intervali900e5:peers12:\x7f\x00\x00\x01\x1a\xe1\x0a\x00\x00\x02\xc8\xd5e".to_vec();
        let (url, handle) = http_responder("200 OK", body).await;

        let response = client().announce(&torrent(&url)).await.unwrap();
        assert_eq!(response.interval, Duration::from_secs(900));
        assert_eq!(
            response.peers,
            vec!["127.0.0.1:6881".parse().unwrap(), "10.0.0.2:51413".parse().unwrap()]
        );

        let request_line = handle.await.unwrap().to_lowercase();
        assert!(request_line.starts_with("get /announce?info_hash="));
        assert!(request_line.contains(&"%ab".repeat(20)));
    }

    #[tokio::test]
    async fn test_announce_http_error_is_unreachable() {
        let (url, _handle) = http_responder("500 Internal Server Error", Vec::new()).await;
        let err = client().announce(&torrent(&url)).await.unwrap_err();
        assert!(matches!(err, TorrentError::TrackerUnreachable { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_announce_with_retry_gives_up() {
        let closed = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            format!("http://{}/announce", listener.local_addr().unwrap())
        };

        let err = client()
            .announce_with_retry(&torrent(&closed), 3, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, TorrentError::TrackerUnreachable { .. }));
    }

    #[tokio::test]
    async fn test_announce_with_retry_does_not_retry_refusal() {
        let (url, handle) = http_responder("200 OK", b"d14:failure reason6:bannede".to_vec()).await;
        let err = client()
            .announce_with_retry(&torrent(&url), 3, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, TorrentError::TrackerProtocolError(_)));
        handle.await.unwrap();
    }
}
