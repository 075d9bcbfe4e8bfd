use std::{
    env, io,
    net::{SocketAddr, ToSocketAddrs},
    sync::Arc,
};

use tdsbridge::{Bridge, BridgeEvents, Error, NativeSni, OpenOptions, ServerTarget};
use tracing_subscriber::EnvFilter;

/// Bridge callbacks wired to tracing.
struct LogEvents {
    debug: bool,
}

impl BridgeEvents for LogEvents {
    fn connection_accepted(&self, peer: SocketAddr) {
        tracing::info!("new connection from {peer}");
    }

    fn connection_closed(&self, peer: SocketAddr) {
        tracing::debug!("connection from {peer} closed");
    }

    fn packet_seen(&self, peer: SocketAddr, header: &tdsbridge::tds::PacketHeader) {
        tracing::debug!("{peer}|{header}");
    }

    fn batch_seen(&self, peer: SocketAddr, sql: &str) {
        if self.debug {
            tracing::debug!("{peer}|batch [{sql}]");
        } else {
            let sql = sql.trim();
            if !sql.is_empty() {
                tracing::info!("SQL: {sql}");
            }
        }
    }

    fn session_error(&self, peer: SocketAddr, error: &Error) {
        tracing::error!("bridge exception ({peer}): {error}");
    }

    fn listener_error(&self, error: &io::Error) {
        tracing::error!("listening thread exception: {error}");
    }
}

fn usage() {
    let name = env!("CARGO_BIN_NAME");
    println!("{name} <listen port> <sql server address> <sql server port> [--debug|-d]");
    println!();
    println!("Examples:");
    println!("  {name} 1533 127.0.0.1 1433");
    println!("    - Listen on port 1533, forward to SQL Server on 127.0.0.1:1433");
    println!();
    println!("  {name} 1533 localdb dummy");
    println!("    - Listen on port 1533, forward to LocalDB (address/port ignored for LocalDB)");
    println!();
    println!(r"Note: when using 'localdb' as address, it connects to (localdb)\MSSQLLocalDB");
}

fn main() {
    let mut debug = false;
    let mut positional = Vec::new();
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--debug" | "-d" => debug = true,
            _ => positional.push(arg),
        }
    }

    let [listen_port, server, server_port] = positional.as_slice() else {
        usage();
        return;
    };
    let Ok(listen_port) = listen_port.parse::<u16>() else {
        usage();
        return;
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let target = match resolve_target(server, server_port) {
        Ok(target) => target,
        Err(message) => {
            tracing::error!("{message}");
            return;
        }
    };

    let driver = match NativeSni::load() {
        Ok(driver) => Arc::new(driver),
        Err(err) => {
            tracing::error!("failed to load the native SNI library: {err}");
            return;
        }
    };

    let mut bridge = match Bridge::bind(
        ("0.0.0.0", listen_port),
        driver,
        target,
        OpenOptions::default(),
        Arc::new(LogEvents { debug }),
    ) {
        Ok(bridge) => bridge,
        Err(err) => {
            tracing::error!("failed to bind port {listen_port}: {err}");
            return;
        }
    };
    if let Err(err) = bridge.start() {
        tracing::error!("failed to start the listener: {err}");
        return;
    }

    if debug {
        println!("Running on port {listen_port} in debug mode. Press enter to stop...");
        println!("Debug mode: all TDS packets and SQL batches are logged.");
    } else {
        println!("Running on port {listen_port}. Press enter to stop...");
    }
    let mut line = String::new();
    let _ = io::stdin().read_line(&mut line);

    bridge.stop();
}

/// `localdb` selects the local default instance; anything else goes
/// through standard name resolution.
fn resolve_target(server: &str, server_port: &str) -> Result<ServerTarget, String> {
    if server.eq_ignore_ascii_case("localdb") {
        return Ok(ServerTarget::local_db());
    }

    let port: u16 = server_port
        .parse()
        .map_err(|_| format!("invalid sql server port: {server_port}"))?;

    let mut addrs = (server, port)
        .to_socket_addrs()
        .map_err(|err| format!("cannot resolve {server}: {err}"))?;
    let addr = addrs
        .next()
        .ok_or_else(|| format!("no address found for {server}"))?;

    Ok(ServerTarget::tcp(&addr.ip().to_string(), addr.port()))
}
