//! rust-torrent-client - Main entry point
//!
//! Dispatches the CLI subcommands onto the library.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rust_torrent_client::{
    bencode, CliArgs, Command, Config, FileWriter, PeerConnection, PieceDownloader, PieceWriter,
    TorrentDownload, TorrentInfo, TorrentParser, TrackerClient,
};
use tracing::{debug, info, warn};

/// Announce attempts before giving up on the tracker
const TRACKER_ATTEMPTS: u32 = 3;

/// Initial delay between announce attempts
const TRACKER_BACKOFF: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse_args();
    init_logging(&args);
    debug!("CLI arguments: {:?}", args);

    let config = Config::from_args(&args).context("Invalid configuration")?;
    config.validate().context("Invalid configuration")?;
    debug!("Using peer id {}", config.peer_id_hex());

    match &args.command {
        Command::Decode { value } => run_decode(value),
        Command::Info { torrent } => run_info(torrent),
        Command::Peers { torrent } => run_peers(torrent, &config).await,
        Command::Handshake { torrent, peer } => run_handshake(torrent, *peer, &config).await,
        Command::DownloadPiece {
            output,
            peer,
            torrent,
            index,
        } => run_download_piece(torrent, *peer, *index, output, &config).await,
        Command::Download { output, torrent } => run_download(torrent, output, &config).await,
    }
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let level = args.log_level();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }

    debug!("Logging initialized with level {:?}", level);
}

/// Load and parse the torrent file
fn load_torrent(path: &Path) -> Result<Arc<TorrentInfo>> {
    let torrent = TorrentParser::parse_file(path)
        .with_context(|| format!("Failed to load torrent file '{}'", path.display()))?;
    info!("Loaded torrent '{}' ({} pieces)", torrent.name, torrent.piece_count());
    Ok(Arc::new(torrent))
}

fn run_decode(value: &str) -> Result<()> {
    let decoded = bencode::decode_all(value.as_bytes()).context("Failed to decode bencoded value")?;
    println!("{}", decoded.to_json());
    Ok(())
}

fn run_info(path: &Path) -> Result<()> {
    let torrent = load_torrent(path)?;

    println!("Tracker URL: {}", torrent.announce);
    println!("Length: {}", torrent.total_size());
    println!("Info Hash: {}", torrent.info_hash_hex());
    println!("Piece Length: {}", torrent.piece_length);
    println!("Piece Hashes:");
    for hash in torrent.piece_hashes_hex() {
        println!("{}", hash);
    }
    Ok(())
}

/// Ask the tracker for peers, retrying transport failures
async fn discover_peers(torrent: &TorrentInfo, config: &Config) -> Result<Vec<SocketAddr>> {
    let tracker = TrackerClient::new(config.peer_id, config.port, config.tracker_timeout)
        .context("Failed to create tracker client")?;
    let response = tracker
        .announce_with_retry(torrent, TRACKER_ATTEMPTS, TRACKER_BACKOFF)
        .await
        .with_context(|| format!("Announce to {} failed", torrent.announce))?;

    info!(
        "Tracker returned {} peers (interval {:?})",
        response.peers.len(),
        response.interval
    );
    Ok(response.peers.into_iter().map(SocketAddr::V4).collect())
}

async fn run_peers(path: &Path, config: &Config) -> Result<()> {
    let torrent = load_torrent(path)?;
    for peer in discover_peers(&torrent, config).await? {
        println!("{}", peer);
    }
    Ok(())
}

async fn run_handshake(path: &Path, peer: SocketAddr, config: &Config) -> Result<()> {
    let torrent = load_torrent(path)?;
    let mut conn = PeerConnection::connect(peer, torrent.info_hash, config.peer_id, config.peer_timeout)
        .await
        .with_context(|| format!("Handshake with {} failed", peer))?;

    let peer_id = conn
        .peer_id()
        .map(hex::encode)
        .context("Peer did not report a peer id")?;
    println!("Peer ID: {}", peer_id);

    conn.close().await;
    Ok(())
}

async fn run_download_piece(
    path: &Path,
    peer: Option<SocketAddr>,
    index: u32,
    output: &Path,
    config: &Config,
) -> Result<()> {
    let torrent = load_torrent(path)?;
    if index as usize >= torrent.piece_count() {
        bail!("Piece index {} out of range (torrent has {} pieces)", index, torrent.piece_count());
    }

    let candidates = match peer {
        Some(addr) => vec![addr],
        None => discover_peers(&torrent, config).await?,
    };
    if candidates.is_empty() {
        bail!("No peers available for '{}'", torrent.name);
    }

    let downloader = PieceDownloader::new(Arc::clone(&torrent), config.pipeline_depth);
    let mut last_error = None;

    for addr in candidates {
        let mut conn = match PeerConnection::connect(addr, torrent.info_hash, config.peer_id, config.peer_timeout).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Skipping peer {}: {}", addr, e);
                last_error = Some(e);
                continue;
            }
        };

        let result = match conn.prepare().await {
            Ok(()) => downloader.download(&mut conn, index).await,
            Err(e) => Err(e),
        };
        conn.close().await;

        match result {
            Ok(data) => {
                tokio::fs::write(output, &data)
                    .await
                    .with_context(|| format!("Failed to write piece to '{}'", output.display()))?;
                println!("Piece {} downloaded to {}.", index, output.display());
                return Ok(());
            }
            Err(e) => {
                warn!("Piece {} from {} failed: {}", index, addr, e);
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(e).with_context(|| format!("Failed to download piece {}", index)),
        None => bail!("Failed to download piece {}", index),
    }
}

async fn run_download(path: &Path, output: &Path, config: &Config) -> Result<()> {
    let torrent = load_torrent(path)?;
    let peers = discover_peers(&torrent, config).await?;

    let writer = FileWriter::create(output, torrent.total_size(), torrent.piece_length)
        .await
        .context("Failed to create output file")?;
    let writer: Arc<dyn PieceWriter> = Arc::new(writer);

    let download = TorrentDownload::new(Arc::clone(&torrent), config.peer_id, config.download_options());
    let stats = download
        .run(peers, writer)
        .await
        .with_context(|| format!("Failed to download '{}'", torrent.name))?;

    info!(
        "Verified {} pieces ({} bytes) from {} peers, {} hash failures",
        stats.pieces_verified, stats.downloaded_bytes, stats.peers_used, stats.pieces_failed
    );
    println!("Downloaded {} to {}.", path.display(), output.display());
    Ok(())
}

