//! tlsbridge CLI
//!
//! TLS client probe and echo server built on the tlsbridge socket adapter.

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::{self, Write as _};
use std::net::TcpStream;
use std::path::PathBuf;
use std::thread;
use tlsbridge_core::{
    Certificate, CertificateChain, ClientContext, PrivateKey, ServerContext, TlsConfiguration,
    TlsError, TlsTransport,
};
use tlsbridge_transport::{ClientWrapExt, ServerWrapExt, SocketConfig, TlsSocket, tcp};
use tracing_subscriber::EnvFilter;

use config::{Config, split_host_port};

/// tlsbridge - buffered TLS transport bridge
#[derive(Parser)]
#[command(name = "tlsbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (default: ~/.config/tlsbridge/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a TLS server and report the negotiated session
    Connect {
        /// Target as host:port
        #[arg(required = true)]
        target: String,

        /// Name for SNI and certificate matching (default: target host)
        #[arg(long)]
        server_name: Option<String>,

        /// Disable SNI and host-name matching
        #[arg(long, conflicts_with = "server_name")]
        no_sni: bool,

        /// Skip certificate validation
        #[arg(long)]
        insecure: bool,

        /// ALPN protocol to offer (repeatable)
        #[arg(long)]
        alpn: Vec<String>,

        /// Send this text after the handshake and print the reply
        #[arg(short, long)]
        send: Option<String>,

        /// Print received bytes as hex
        #[arg(long)]
        hex: bool,
    },

    /// Run a TLS echo server
    Serve {
        /// Listen address (default: from config)
        #[arg(short, long)]
        bind: Option<String>,

        /// Serve a throwaway self-signed certificate for this name
        #[arg(long)]
        self_signed: Option<String>,

        /// Exit after the first connection
        #[arg(long)]
        once: bool,
    },

    /// Show the resolved configuration
    Info,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::resolve(cli.config.as_deref())?;
    config.validate()?;

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Connect {
            target,
            server_name,
            no_sni,
            insecure,
            alpn,
            send,
            hex,
        } => {
            let options = ConnectArgs {
                server_name,
                no_sni,
                insecure,
                alpn,
                send,
                hex,
            };
            connect(&target, options, &config)?;
        }
        Commands::Serve {
            bind,
            self_signed,
            once,
        } => {
            serve(bind, self_signed, once, &config)?;
        }
        Commands::Info => show_info(cli.config, &config)?,
        Commands::Init { force } => init_config(cli.config, force)?,
    }

    Ok(())
}

/// Command-line overrides for `connect`
struct ConnectArgs {
    server_name: Option<String>,
    no_sni: bool,
    insecure: bool,
    alpn: Vec<String>,
    send: Option<String>,
    hex: bool,
}

/// Connect, handshake, optionally exchange data, then close
fn connect(target: &str, args: ConnectArgs, config: &Config) -> anyhow::Result<()> {
    let (host, _) = split_host_port(target)?;

    let mut client = config.client.clone();
    if args.insecure {
        client.validate_certificates = false;
    }
    if !args.alpn.is_empty() {
        client.tls.alpn = args.alpn;
    }
    let context = ClientContext::new(client.tls_configuration()?)?;

    let server_name = if args.no_sni {
        None
    } else {
        Some(
            args.server_name
                .or_else(|| client.server_name.clone())
                .unwrap_or_else(|| host.to_string()),
        )
    };

    tracing::info!("Connecting to {} (server name: {:?})", target, server_name);
    let stream = tcp::connect(target, &client.connect_options())
        .with_context(|| format!("connecting to {target}"))?;
    let mut tls = context
        .wrap_socket_with_config(
            stream,
            server_name.as_deref(),
            true,
            config.socket.socket_config(),
        )
        .context("TLS handshake failed")?;

    print_session(&tls);

    if let Some(payload) = args.send {
        tls.send_all(payload.as_bytes())?;
        let received = read_until_closed(&mut tls, config.socket.recv_chunk_size)?;
        println!();
        if args.hex {
            println!("{}", hex::encode(&received));
        } else {
            println!("{}", String::from_utf8_lossy(&received));
        }
        println!("Received: {} bytes", received.len());
    }

    let stats = tls.stats();
    tls.close()?;
    tracing::debug!(?stats, "connection closed");
    Ok(())
}

/// Read until the peer closes or the socket times out
fn read_until_closed(tls: &mut TlsSocket<TcpStream>, chunk: usize) -> anyhow::Result<Vec<u8>> {
    let mut received = Vec::new();
    loop {
        match tls.read(chunk) {
            Ok(data) if data.is_empty() => break,
            Ok(data) => received.extend_from_slice(&data),
            Err(TlsError::Timeout) => {
                tracing::debug!("read timed out, assuming the reply is complete");
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(received)
}

fn print_session<T: TlsTransport>(tls: &T) {
    let unknown = || "-".to_string();
    println!(
        "Version: {}",
        tls.negotiated_version().map_or_else(unknown, |v| v.to_string())
    );
    println!(
        "Cipher: {}",
        tls.cipher().map_or_else(unknown, |c| c.to_string())
    );
    println!(
        "ALPN: {}",
        tls.negotiated_protocol()
            .map_or_else(unknown, |p| p.to_string())
    );
}

/// Accept connections and echo application data back
fn serve(
    bind: Option<String>,
    self_signed: Option<String>,
    once: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let mut configuration = config.server.tls_configuration()?;
    if let Some(name) = self_signed {
        tracing::warn!("Serving a self-signed certificate for {}", name);
        configuration = with_self_signed(&configuration, &name)?;
    }
    let context = ServerContext::new(configuration).context("invalid server configuration")?;

    let addr = match bind {
        Some(bind) => bind.parse().with_context(|| format!("invalid bind address {bind}"))?,
        None => config.server.parse_listen_addr()?,
    };
    let listener = tcp::listen(addr)?;
    println!("Listening on {}", listener.local_addr()?);

    let accept_options = config.server.accept_options();
    for stream in listener.incoming() {
        let Some(stream) = accepted(stream, &accept_options) else {
            continue;
        };

        let context = context.clone();
        let socket_config = config.socket.socket_config();
        let handle = thread::spawn(move || {
            let peer = stream.peer_addr().ok();
            match echo(stream, &context, socket_config) {
                Ok(bytes) => tracing::info!(?peer, bytes, "connection finished"),
                Err(err) => tracing::warn!(?peer, "connection failed: {:#}", err),
            }
        });

        if once {
            let _ = handle.join();
            break;
        }
    }

    Ok(())
}

/// Prepare an accepted connection; failures only skip that connection
fn accepted(stream: io::Result<TcpStream>, options: &tcp::ConnectOptions) -> Option<TcpStream> {
    let stream = match stream {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!("accept failed: {}", err);
            return None;
        }
    };
    if let Err(err) = tcp::configure_stream(&stream, options) {
        tracing::warn!(peer = ?stream.peer_addr().ok(), "configuring accepted socket failed: {}", err);
        return None;
    }
    Some(stream)
}

fn echo(stream: TcpStream, context: &ServerContext, socket_config: SocketConfig) -> anyhow::Result<u64> {
    let mut tls = context.wrap_socket_with_config(stream, true, socket_config.clone())?;
    tracing::info!(
        version = ?tls.negotiated_version(),
        cipher = ?tls.cipher(),
        alpn = ?tls.negotiated_protocol(),
        "handshake complete"
    );

    let mut total = 0u64;
    loop {
        let data = tls.read(socket_config.recv_chunk_size)?;
        if data.is_empty() {
            break;
        }
        tls.send_all(&data)?;
        total += data.len() as u64;
    }
    tls.close()?;
    Ok(total)
}

/// Replace the certificate chain with a freshly generated self-signed one
fn with_self_signed(configuration: &TlsConfiguration, name: &str) -> anyhow::Result<TlsConfiguration> {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec![name.to_string()])?;
    let certificate = Certificate::from_der(cert.der().to_vec());
    let key = PrivateKey::from_buffer(&key_pair.serialize_der(), None)?;
    let chain = CertificateChain::new(vec![certificate], key)?;
    Ok(configuration.with_certificate_chain(Some(chain)))
}

fn show_info(path: Option<PathBuf>, config: &Config) -> anyhow::Result<()> {
    println!("tlsbridge {}", env!("CARGO_PKG_VERSION"));
    let path = path.unwrap_or_else(Config::default_path);
    let source = if path.exists() { "" } else { " (not found, using defaults)" };
    println!("Config: {}{}", path.display(), source);
    println!();

    let client = config.client.tls_configuration()?;
    println!("Client:");
    println!("  Validate certificates: {}", client.validate_certificates());
    println!(
        "  Versions: {} - {}",
        client.lowest_supported_version(),
        client.highest_supported_version()
    );
    print_list("  Ciphers", client.ciphers());
    print_list("  ALPN", client.inner_protocols());
    println!();

    let server = config.server.tls_configuration()?;
    println!("Server:");
    println!("  Listen: {}", config.server.listen_addr);
    println!(
        "  Certificate: {}",
        server
            .certificate_chain()
            .map_or("none".to_string(), |chain| format!(
                "{} certificate(s)",
                chain.certificates().len()
            ))
    );
    println!();

    println!("Socket:");
    println!("  Receive chunk: {} bytes", config.socket.recv_chunk_size);
    println!("  Send chunk: {} bytes", config.socket.send_chunk_size);
    match config.socket.egress_limit {
        Some(limit) => println!("  Egress limit: {limit} bytes"),
        None => println!("  Egress limit: unbounded"),
    }

    Ok(())
}

fn print_list<T: std::fmt::Display>(label: &str, items: &[T]) {
    let mut out = std::io::stdout().lock();
    let _ = write!(out, "{label}:");
    if items.is_empty() {
        let _ = write!(out, " none");
    }
    for item in items {
        let _ = write!(out, " {item}");
    }
    let _ = writeln!(out);
}

fn init_config(path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(Config::default_path);
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default().save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
