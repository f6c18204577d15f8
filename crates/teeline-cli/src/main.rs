//! TEELINE CLI
//!
//! Encrypted frame streaming with key material held by a secure backend

mod config;
mod report;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand_core::{OsRng, RngCore};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use teeline_core::{
    Connection, ConnectionConfig, Frame, SymmetricSession, decrypt_frame, encrypt_symmetric,
};
use teeline_crypto::{
    AES_BLOCK_SIZE, Algorithm, CipherMode, CipherParams, SharedBackend, SoftwareBackend,
};
use teeline_transport::{TcpAcceptor, TcpChannel, TcpConfig};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use zeroize::Zeroizing;

use config::Config;
use report::{format_bytes, format_rate, format_timing};

/// TEELINE - encrypted frame streaming over a secure backend
#[derive(Parser)]
#[command(name = "teeline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path [default: ~/.config/teeline/config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a streaming peer and decrypt everything it sends
    Receive {
        /// Streaming peer address (overrides the config)
        #[arg(long)]
        connect: Option<String>,

        /// Write plaintext to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Accept receivers and stream a file to each as encrypted frames
    Stream {
        /// File to stream
        #[arg(short, long)]
        input: PathBuf,

        /// Listen address (overrides the config)
        #[arg(short, long)]
        bind: Option<String>,

        /// Plaintext bytes per frame (overrides the config)
        #[arg(long)]
        frame_size: Option<usize>,

        /// Number of times to stream the file to each receiver
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },

    /// Write a configuration file with default settings
    Init {
        /// Destination (defaults to --config, then the per-user config path)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Symmetric encrypt/decrypt self-test through the software backend
    Bench {
        /// Number of round trips
        #[arg(long, default_value_t = 100)]
        iterations: u32,

        /// Plaintext bytes per round trip
        #[arg(long, default_value_t = 4096)]
        size: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match (&cli.command, &cli.config) {
        (Commands::Init { .. }, _) => Config::default(),
        (_, Some(path)) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        (_, None) => Config::load_or_default()?,
    };

    // Initialize logging; stdout may carry plaintext
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();

    config.validate()?;

    match cli.command {
        Commands::Receive { connect, output } => {
            receive(connect, output, &config).await?;
        }
        Commands::Stream {
            input,
            bind,
            frame_size,
            repeat,
        } => {
            stream(input, bind, frame_size, repeat, &config).await?;
        }
        Commands::Init { output, force } => {
            let path = output
                .or_else(|| cli.config.clone())
                .unwrap_or_else(Config::default_path);
            init(&path, force)?;
        }
        Commands::Bench { iterations, size } => {
            bench(iterations, size, &config)?;
        }
    }

    Ok(())
}

fn parse_addr(addr: Option<String>, config: &Config) -> anyhow::Result<SocketAddr> {
    match addr {
        Some(addr) => addr
            .parse()
            .with_context(|| format!("Invalid address: {addr}")),
        None => config.socket_addr(),
    }
}

/// Write the default configuration to `path`
fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default()
        .save(path)
        .with_context(|| format!("Failed to write config {}", path.display()))?;
    println!("Configuration written to: {}", path.display());
    Ok(())
}

/// Receive and decrypt frames from a streaming peer
async fn receive(
    connect: Option<String>,
    output: Option<PathBuf>,
    config: &Config,
) -> anyhow::Result<()> {
    let addr = parse_addr(connect, config)?;
    let channel = TcpChannel::connect(addr, &TcpConfig::default()).await?;

    let backend = SharedBackend::new(SoftwareBackend::new());
    let mut connection = Connection::new(channel, backend, config.connection_config())?;

    let handle = connection.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, closing connection");
            handle.close();
        }
    });

    let public_key = connection.handshake_as_receiver().await?;
    tracing::debug!("Public modulus: {}", hex::encode(&public_key.modulus));
    tracing::debug!("Public exponent: {}", hex::encode(&public_key.exponent));

    let mut sink: Box<dyn AsyncWrite + Unpin + Send> = match &output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let started = Instant::now();
    let mut written = 0u64;
    loop {
        let frame = match connection.next_plaintext().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                // Keep whatever the failing frame yielded before the error
                for chunk in &err.partial {
                    sink.write_all(chunk).await?;
                }
                sink.flush().await?;
                return Err(err.into());
            }
        };

        for chunk in &frame.chunks {
            sink.write_all(chunk).await?;
        }
        written += frame.len() as u64;
        tracing::debug!("Frame {}: {} bytes", frame.sequence, frame.len());
    }
    sink.flush().await?;

    let stats = connection.close().await?;
    tracing::info!(
        "Received {} frames, {} plaintext at {}",
        stats.frames_received,
        format_bytes(written),
        format_rate(written, started.elapsed())
    );
    if let Some(path) = output {
        tracing::info!("Plaintext written to {}", path.display());
    }

    Ok(())
}

/// Stream a file to every receiver that connects
async fn stream(
    input: PathBuf,
    bind: Option<String>,
    frame_size: Option<usize>,
    repeat: u32,
    config: &Config,
) -> anyhow::Result<()> {
    let data: Arc<[u8]> = tokio::fs::read(&input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?
        .into();

    let frame_size = frame_size.unwrap_or(config.transfer.frame_size);
    if frame_size == 0 {
        anyhow::bail!("Frame size must be positive");
    }

    let addr = parse_addr(bind, config)?;
    let acceptor = TcpAcceptor::bind(addr, TcpConfig::default())?;
    tracing::info!(
        "Streaming {} ({}) on {} in frames of {}",
        input.display(),
        format_bytes(data.len() as u64),
        acceptor.local_addr()?,
        format_bytes(frame_size as u64)
    );

    let backend = SharedBackend::new(SoftwareBackend::new());
    let connection_config = config.connection_config();
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            accepted = acceptor.accept() => {
                let channel = match accepted {
                    Ok(channel) => channel,
                    Err(e) => {
                        tracing::warn!("Accept failed: {e}");
                        continue;
                    }
                };

                let data = Arc::clone(&data);
                let backend = backend.clone();
                let connection_config = connection_config.clone();
                tasks.spawn(async move {
                    let peer = channel.peer_addr();
                    if let Err(e) =
                        serve_receiver(channel, backend, connection_config, data, frame_size, repeat).await
                    {
                        tracing::error!("Receiver {peer}: {e:#}");
                    }
                });
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    tracing::warn!("Receiver task failed: {e}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping {} active receivers", tasks.len());
                break;
            }
        }
    }

    tasks.shutdown().await;
    Ok(())
}

async fn serve_receiver(
    channel: TcpChannel,
    backend: SharedBackend<SoftwareBackend>,
    config: ConnectionConfig,
    data: Arc<[u8]>,
    frame_size: usize,
    repeat: u32,
) -> anyhow::Result<()> {
    let mut connection = Connection::new(channel, backend, config)?;
    let key = connection.handshake_as_sender().await?;
    let peer = connection.peer_label();
    tracing::debug!("Receiver {peer} uses {}-byte blocks", key.block_size());

    let started = Instant::now();
    for _ in 0..repeat {
        for piece in data.chunks(frame_size) {
            connection.send_plaintext(piece).await?;
        }
    }

    let stats = connection.close().await?;
    tracing::info!(
        "Sent {} frames ({}) to {} at {}",
        stats.frames_sent,
        format_bytes(stats.bytes_sent),
        peer,
        format_rate(stats.bytes_sent, started.elapsed())
    );
    Ok(())
}

/// Symmetric round-trip self-test
fn bench(iterations: u32, size: usize, config: &Config) -> anyhow::Result<()> {
    let algorithm = config.crypto.symmetric_algorithm;
    let key_size = config.crypto.symmetric_key_size;
    let size = if algorithm.requires_alignment() {
        size.div_ceil(AES_BLOCK_SIZE) * AES_BLOCK_SIZE
    } else {
        size
    };

    let mut plaintext = vec![0u8; size];
    OsRng.fill_bytes(&mut plaintext);

    println!("TEELINE symmetric self-test");
    println!("Cipher: {algorithm}, {}-bit key", key_size * 8);
    println!("Payload: {}", format_bytes(size as u64));
    println!("Iterations: {iterations}");
    println!();

    let backend = SharedBackend::new(SoftwareBackend::new());
    let mut timings: Vec<Duration> = Vec::with_capacity(iterations as usize);
    let mut failures = 0u32;

    for i in 0..iterations {
        let started = Instant::now();
        match round_trip(&backend, algorithm, key_size, &plaintext) {
            Ok(true) => {
                let elapsed = started.elapsed();
                tracing::debug!("Iteration {i}: {}", format_timing(elapsed));
                timings.push(elapsed);
            }
            Ok(false) => {
                failures += 1;
                tracing::warn!("Iteration {i}: decrypted plaintext differs");
            }
            Err(e) => {
                failures += 1;
                tracing::error!("Iteration {i}: {e} ({})", e.kind());
            }
        }
    }

    if let (Some(min), Some(max)) = (timings.iter().min(), timings.iter().max()) {
        let total: Duration = timings.iter().sum();
        let avg = total / timings.len() as u32;
        println!("min {}  avg {}  max {}", format_timing(*min), format_timing(avg), format_timing(*max));
        println!(
            "throughput {}",
            format_rate(2 * size as u64 * timings.len() as u64, total)
        );
    }
    println!("{} passed, {} failed", timings.len(), failures);

    if failures > 0 {
        anyhow::bail!("{failures} of {iterations} round trips failed");
    }
    Ok(())
}

/// Encrypt then decrypt `plaintext` under a fresh random key and IV.
fn round_trip(
    backend: &SharedBackend<SoftwareBackend>,
    algorithm: Algorithm,
    key_size: usize,
    plaintext: &[u8],
) -> teeline_core::Result<bool> {
    let mut key = Zeroizing::new(vec![0u8; key_size]);
    let mut iv = Zeroizing::new([0u8; AES_BLOCK_SIZE]);
    OsRng.fill_bytes(&mut key[..]);
    OsRng.fill_bytes(&mut iv[..]);

    let mut encryptor = open_cipher(backend, algorithm, key_size, CipherMode::Encrypt, &key, &iv[..])?;
    let mut decryptor = open_cipher(backend, algorithm, key_size, CipherMode::Decrypt, &key, &iv[..])?;

    let ciphertext = encrypt_symmetric(&mut encryptor, plaintext)?;
    let decrypted =
        decrypt_frame(&mut decryptor, &Frame::new(0, ciphertext)).map_err(|partial| partial.error)?;

    encryptor.close()?;
    decryptor.close()?;
    Ok(decrypted.concat() == plaintext)
}

fn open_cipher(
    backend: &SharedBackend<SoftwareBackend>,
    algorithm: Algorithm,
    key_size: usize,
    mode: CipherMode,
    key: &[u8],
    iv: &[u8],
) -> teeline_core::Result<SymmetricSession<SoftwareBackend>> {
    let mut session = SymmetricSession::open(backend.clone())?;
    session.prepare(CipherParams::new(algorithm, key_size, mode)?)?;
    session.set_key(key)?;
    session.set_iv(iv)?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_loadable_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");

        init(&path, false).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.network.port, Config::default().network.port);
        assert!(loaded.validate().is_ok());

        // Refuses to clobber without --force
        assert!(init(&path, false).is_err());
        init(&path, true).unwrap();
    }
}
