use std::{
    fs,
    io::Cursor,
    path::{Path, PathBuf},
    sync::Arc,
};

use rustls::{ClientConfig, RootCertStore, pki_types::ServerName};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use crate::Result;

pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxedStream = Box<dyn Stream>;

/// How to verify a TLS server.
#[derive(Debug, Clone)]
pub struct TlsOptions {
    /// PEM file with the certificate authorities to trust.
    pub ca_file: PathBuf,
    /// Name the server certificate must be issued for.
    pub server_name: String,
}

fn connector(ca_file: &Path) -> Result<TlsConnector> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let pem =
        fs::read(ca_file).map_err(|e| format!("failed to read {}: {}", ca_file.display(), e))?;
    let certs = rustls_pemfile::certs(&mut Cursor::new(pem))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    debug!("Trusting {} CA certificates ({} ignored)", added, ignored);
    if added == 0 {
        return Err(format!("no usable CA certificates in {}", ca_file.display()).into());
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Opens a connection to `addr`, wrapping it in TLS when `tls` is given.
pub async fn connect(addr: &str, tls: Option<&TlsOptions>) -> Result<BoxedStream> {
    info!("Connecting to {}", addr);
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;

    let Some(options) = tls else {
        return Ok(Box::new(stream));
    };

    let connector = connector(&options.ca_file)?;
    let name = ServerName::try_from(options.server_name.clone())?;
    let stream = connector.connect(name, stream).await?;
    info!("TLS session established with {}", options.server_name);
    Ok(Box::new(stream))
}
