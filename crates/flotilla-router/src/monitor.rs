use std::sync::Arc;
use std::time::Duration;

use flotilla_common::parse_telemetry_datagram;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::counters::EngineCounters;
use crate::error::RegisterError;
use crate::registry::HealthTable;

/// Telemetry records are a handful of short fields; anything longer is truncated
/// and will fail to parse.
const MAX_DATAGRAM_BYTES: usize = 1024;

/// Bind a telemetry socket without yielding. Must run inside a tokio runtime.
pub fn bind_telemetry_socket(host: &str, port: u16) -> Result<UdpSocket, RegisterError> {
    let addr = format!("{host}:{port}");
    let bound = std::net::UdpSocket::bind(&addr)
        .and_then(|socket| {
            socket.set_nonblocking(true)?;
            UdpSocket::from_std(socket)
        });
    bound.map_err(|source| RegisterError::TelemetryBind { addr, source })
}

/// Receive load reports on one port until `cancel` fires.
///
/// Each datagram carries one record, keyed by the `ip,port` it names, so any
/// number of nodes may share a port. Malformed records and receive errors are
/// logged and counted; they never stop the listener.
pub async fn telemetry_listener(
    socket: UdpSocket,
    table: Arc<HealthTable>,
    counters: Arc<EngineCounters>,
    recv_timeout: Duration,
    cancel: CancellationToken,
) {
    let local_addr = socket
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    tracing::info!(%local_addr, "telemetry listener started");

    let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = tokio::time::timeout(recv_timeout, socket.recv_from(&mut buf)) => r,
        };

        let (len, peer) = match received {
            Err(_elapsed) => continue,
            Ok(Err(e)) => {
                tracing::warn!(%local_addr, error=%e, "telemetry receive failed");
                continue;
            }
            Ok(Ok(v)) => v,
        };

        match parse_telemetry_datagram(&buf[..len]) {
            Ok(report) => {
                counters.inc_telemetry_samples();
                tracing::trace!(
                    %peer,
                    reported=%report.key(),
                    available_memory=report.available_memory,
                    num_running=report.num_running,
                    num_waiting=report.num_waiting,
                    "telemetry sample"
                );
                table.upsert(report);
            }
            Err(e) => {
                counters.inc_telemetry_malformed();
                tracing::debug!(%local_addr, %peer, error=%e, "dropping malformed telemetry record");
            }
        }
    }

    tracing::info!(%local_addr, "telemetry listener stopped");
}
