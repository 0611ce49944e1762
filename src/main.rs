//! Process bootstrap (§4.8/§6): read configuration, initialize the voting
//! subsystem, connect to the server, run the handshake and event loop,
//! clean up. Mirrors the original's `main()` ordering one step at a time;
//! any failure along the way is a `ProcessError` and becomes exit code 1.

use std::net::ToSocketAddrs;

use mio::net::TcpStream as MioTcpStream;

use qdevice_net::codec::options::DecisionAlgorithm;
use qdevice_net::config::{ConfigStore, DeviceConfig, TomlConfigStore};
use qdevice_net::error::ProcessError;
use qdevice_net::event_loop::EventLoop;
use qdevice_net::instance::Connection;
use qdevice_net::protocol::state;
use qdevice_net::transport::Transport;
use qdevice_net::votequorum::{self, VotingSubsystem};

const CONFIG_PATH_ENV: &str = "QDEVICE_NET_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "/etc/corosync/qdevice/net/qdevice-net.toml";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), ProcessError> {
    let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let store = TomlConfigStore::load(std::path::Path::new(&config_path))?;
    let device_config = DeviceConfig::from_store(&store as &dyn ConfigStore)?;

    log::info!(
        "Connecting to qdevice-net server {}:{}",
        device_config.host,
        device_config.port
    );

    #[cfg(unix)]
    let mut voting = votequorum::LibVotequorum::connect()?;
    #[cfg(not(unix))]
    let mut voting = unreachable!("this crate targets unix hosts only");

    voting.qdevice_register(votequorum::QDEVICE_NAME)?;

    let result = connect_and_run(&device_config, &mut voting);

    // Invariant from §3's lifecycle: always unregister before tearing the
    // instance down, whether the connection ended cleanly or fatally.
    if let Err(e) = voting.qdevice_unregister() {
        log::error!("failed to unregister from votequorum: {e}");
    }

    result
}

fn connect_and_run(
    device_config: &DeviceConfig,
    voting: &mut dyn VotingSubsystem,
) -> Result<(), ProcessError> {
    let addr = (device_config.host.as_str(), device_config.port)
        .to_socket_addrs()
        .map_err(ProcessError::Socket)?
        .next()
        .ok_or_else(|| {
            ProcessError::Config(format!(
                "host '{}' did not resolve to any address",
                device_config.host
            ))
        })?;

    let stream = MioTcpStream::connect(addr).map_err(ProcessError::Socket)?;
    let transport = Transport::connect(stream);

    let tls_config = build_tls_config_if_needed(device_config)?;

    let mut conn = Connection::new(
        transport,
        device_config.node_id,
        device_config.cluster_name.clone(),
        device_config.host.clone(),
        device_config.port,
        device_config.tls_supported,
        DecisionAlgorithm::Test,
        device_config.heartbeat_interval,
        device_config.sync_heartbeat_interval,
        tls_config,
    );

    state::start(&mut conn).map_err(|e| ProcessError::Config(e.to_string()))?;

    let mut event_loop = EventLoop::new(&conn, voting).map_err(ProcessError::Socket)?;

    event_loop.run(&mut conn, voting)?;

    if let Some(reason) = conn.disconnect_pending {
        log::error!("Connection closed: {reason}");
    } else {
        log::info!("Connection closed cleanly");
    }
    Ok(())
}

#[cfg(feature = "tls")]
fn build_tls_config_if_needed(
    device_config: &DeviceConfig,
) -> Result<Option<qdevice_net::instance::TlsConfigHandle>, ProcessError> {
    use qdevice_net::codec::options::TlsSupported;

    if device_config.tls_supported == TlsSupported::Unsupported {
        return Ok(None);
    }
    let material = qdevice_net::tls::TlsMaterial::in_dir(&device_config.nssdb_dir);
    Ok(Some(qdevice_net::tls::build_client_config(&material)?))
}

#[cfg(not(feature = "tls"))]
fn build_tls_config_if_needed(
    _device_config: &DeviceConfig,
) -> Result<Option<qdevice_net::instance::TlsConfigHandle>, ProcessError> {
    Ok(None)
}
