use std::{
    collections::HashSet,
    net::{TcpStream, ToSocketAddrs},
    time::{Duration, Instant},
};

use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use tracing::{debug, info};

use crate::{
    certificate::{Certificate, SourceFormat},
    error::{ChainError, ChainResult},
};

/// Pulls the certificate chain a TLS server presents during the handshake.
///
/// Peer verification is switched off: the point is to inspect whatever the
/// server sends, including incomplete or expired chains.
#[derive(Debug, Clone)]
pub struct LiveChainFetcher {
    timeout: Duration,
}

impl LiveChainFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Certificates in the order the server sent them, leaf first
    pub async fn fetch(&self, host: &str, port: u16) -> ChainResult<Vec<Certificate>> {
        let timeout = self.timeout;
        let owned_host = host.to_string();
        let handshake =
            tokio::task::spawn_blocking(move || handshake(&owned_host, port, timeout));

        let certificates = match tokio::time::timeout(timeout, handshake).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_err)) => return Err(connection_failed(host, port, join_err)),
            Err(_) => return Err(connection_failed(host, port, "handshake timed out")),
        };

        info!(
            host,
            port,
            certificates = certificates.len(),
            "fetched live chain"
        );

        Ok(certificates)
    }
}

fn connection_failed(host: &str, port: u16, reason: impl ToString) -> ChainError {
    ChainError::ConnectionFailed {
        host: host.to_string(),
        port,
        reason: reason.to_string(),
    }
}

fn handshake(host: &str, port: u16, timeout: Duration) -> ChainResult<Vec<Certificate>> {
    let started = Instant::now();
    let failed = |reason: String| connection_failed(host, port, reason);

    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| failed(format!("unable to resolve host: {e}")))?;

    let mut last_error = format!("no addresses found for {host}");
    let mut stream = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(connected) => {
                stream = Some(connected);
                break;
            }
            Err(e) => last_error = e.to_string(),
        }
    }
    let stream = stream.ok_or_else(|| failed(last_error))?;

    stream
        .set_read_timeout(Some(timeout))
        .and_then(|_| stream.set_write_timeout(Some(timeout)))
        .map_err(|e| failed(e.to_string()))?;

    let mut connector = SslConnector::builder(SslMethod::tls_client())
        .map_err(|e| failed(e.to_string()))?;
    connector.set_verify(SslVerifyMode::NONE);
    let connector = connector.build();

    let mut config = connector.configure().map_err(|e| failed(e.to_string()))?;
    config.set_verify_hostname(false);

    // SNI is only meaningful for names, not literal addresses
    config.set_use_server_name_indication(host.parse::<std::net::IpAddr>().is_err());

    let tls = config
        .connect(host, stream)
        .map_err(|e| failed(format!("TLS handshake failed: {e}")))?;

    let ssl = tls.ssl();
    let mut seen = HashSet::new();
    let mut certificates = Vec::new();

    let presented = ssl
        .peer_certificate()
        .into_iter()
        .chain(ssl.peer_cert_chain().into_iter().flatten().map(|c| c.to_owned()));

    for x509 in presented {
        let certificate = Certificate::from_x509(&x509, SourceFormat::Live)?;
        if seen.insert(certificate.der.clone()) {
            certificates.push(certificate);
        }
    }

    debug!(
        host,
        port,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "TLS handshake complete"
    );

    if certificates.is_empty() {
        return Err(ChainError::NoCertificatesFound);
    }

    Ok(certificates)
}
