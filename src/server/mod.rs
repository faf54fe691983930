// RTMP TCP accept loop
//
// Grounded on the source's `server::tcp::tcp_server`: bind a listener, loop
// `accept()`, spawn one task per connection. Dropped the source's TLS
// listener, IP-connection-counter, and control-key-validation hooks — this
// crate's routing fabric has no use for them (see DESIGN.md).

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::config::{RtmpServerConfig, TimingConfig};
use crate::log::Logger;
use crate::registry::StreamRegistry;
use crate::session::run_session;
use crate::session_id_generator::SessionIdGenerator;
use crate::{log_debug, log_error, log_info};

/// Binds the configured TCP address and drives one `run_session` task per
/// accepted connection until the listener itself fails
pub async fn run_server(
    config: RtmpServerConfig,
    timing: TimingConfig,
    registry: StreamRegistry,
    logger: Logger,
) -> std::io::Result<()> {
    let listen_addr = config.get_tcp_listen_addr();
    let listener = TcpListener::bind(&listen_addr).await?;

    log_info!(logger, format!("listening for RTMP connections on {}", listen_addr));

    let session_ids = Arc::new(Mutex::new(SessionIdGenerator::new()));

    loop {
        let (socket, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log_error!(logger, format!("could not accept connection: {}", e));
                continue;
            }
        };

        let _ = socket.set_nodelay(true);

        let uid = session_ids.lock().await.generate_id();
        let prefix = format!("[SESSION #{}] ", uid);
        let conn_logger = logger.make_child_logger(&prefix);
        let session_logger = logger.make_child_logger(&prefix);
        let peer_url_prefix = format!("rtmp://{}", peer_addr.ip());

        let config = config.clone();
        let timing = timing.clone();
        let registry = registry.clone();

        tokio::spawn(async move {
            log_debug!(conn_logger, format!("connection accepted from {}", peer_addr));

            if let Err(err) = run_session(uid, socket, peer_url_prefix, config, timing, registry, session_logger).await {
                log_debug!(conn_logger, format!("session ended with error: {}", err));
            }
        });
    }
}
