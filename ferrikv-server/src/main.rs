//! Binary entry point (`ferrikvd`): CLI parsing, config/log bootstrap,
//! loading whatever persisted state exists on disk, then handing off to the
//! event loop (spec §6, §4.8, §4.9).

mod client;
mod commands;
mod config;
mod connection;
mod cron;
mod error;
mod logging;
mod server;

use clap::Parser;
use config::ServerConfig;
use ferrikv_core::ClientId;
use server::Server;
use slog::{error, info, warn};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

/// `ferrikvd [config-file]` -- a single optional positional argument, same
/// shape as the `redis-server` CLI this protocol is modeled on.
#[derive(Parser, Debug)]
#[command(name = "ferrikvd", version, about = "An in-memory key/value store")]
struct Cli {
    /// Path to a config file of `directive value` lines.
    config_file: Option<String>,
}

/// A client id reserved for replaying persisted commands into the keyspace
/// at startup. Real client ids start at 1, so this never collides.
const LOAD_CLIENT_ID: ClientId = 0;

fn main() {
    let cli = Cli::parse();

    let config = match &cli.config_file {
        Some(path) => match ServerConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("ferrikvd: {}", e);
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };

    let log = logging::init(&config);

    let mut server = match Server::new(config, log.clone()) {
        Ok(server) => server,
        Err(e) => {
            error!(log, "failed to start server"; "err" => %e);
            std::process::exit(1);
        }
    };

    if let Err(e) = load_persisted_state(&mut server) {
        error!(log, "failed to load persisted state"; "err" => %e);
        std::process::exit(1);
    }

    if let Err(e) = server.run() {
        error!(log, "event loop exited with an error"; "err" => %e);
        std::process::exit(1);
    }

    info!(log, "shutting down");
}

/// AOF wins over RDB when both are present and `appendonly` is on -- it's
/// strictly more up to date, since every mutating command lands there
/// before the next snapshot (spec §4.9).
fn load_persisted_state(server: &mut Server) -> io::Result<()> {
    if server.config.appendonly {
        let path = Path::new(&server.config.dir).join(&server.config.appendfilename);
        if path.exists() {
            replay_aof(server, &path)?;
            return Ok(());
        }
    }

    let path = server.rdb_path();
    if path.exists() {
        load_rdb(server, &path)?;
    }
    Ok(())
}

fn load_rdb(server: &mut Server, path: &Path) -> io::Result<()> {
    let mut file = BufReader::new(File::open(path)?);
    let now = ferrikv_proto::time::timestamp_secs();
    let keyspace = ferrikv_persist::rdb::load(&mut file, server.config.databases, now)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    info!(server.log, "loaded RDB snapshot"; "path" => %path.display());
    server.keyspace = keyspace;
    Ok(())
}

/// Feeds every command in the log back through its handler, bypassing
/// `Server::invoke` entirely so the replayed writes don't get re-appended to
/// the very file they came from (spec §4.9's AOF-is-append-only guarantee
/// would otherwise be violated on every restart). A loopback socket gives
/// the replay a real `Client` to hang `SELECT`'s db-index bookkeeping off
/// of; it's never registered with the poller and is dropped once replay
/// finishes.
fn replay_aof(server: &mut Server, path: &Path) -> io::Result<()> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let now = ferrikv_proto::time::timestamp_secs();

    let client = make_loopback_client(LOAD_CLIENT_ID, now)?;
    server.clients.insert(LOAD_CLIENT_ID, client);

    let result = ferrikv_persist::aof::replay(reader, |args| {
        if args.is_empty() {
            return;
        }
        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        if let Some(spec) = server.command_spec(&name) {
            let _ = (spec.handler)(server, LOAD_CLIENT_ID, &args);
        } else {
            warn!(server.log, "skipping unknown command while replaying AOF"; "command" => name);
        }
    });

    server.clients.remove(&LOAD_CLIENT_ID);
    server.dirty = 0;

    result.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    info!(server.log, "replayed append-only file"; "path" => %path.display());
    Ok(())
}

fn make_loopback_client(id: ClientId, now: u64) -> io::Result<client::Client> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let outbound = std::net::TcpStream::connect(addr)?;
    let (inbound, peer_addr) = listener.accept()?;
    outbound.set_nonblocking(true)?;
    inbound.set_nonblocking(true)?;
    drop(outbound);

    let stream = mio::net::TcpStream::from_std(inbound);
    let mut c = client::Client::new(id, stream, peer_addr, now);
    c.authenticated = true;
    Ok(c)
}
