//! Byte-stream connections handed to session workers, plain TCP or TLS.

use std::{
    fs,
    io::{self, Cursor},
    path::{Path, PathBuf},
    sync::Arc,
};

use derive_more::{Display, Error};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxedConnection = Box<dyn Connection>;

#[derive(Debug, Display, Error)]
pub enum TlsError {
    #[display("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[display("malformed PEM data: {source}")]
    Pem { source: io::Error },
    #[display("PEM data contains no certificates")]
    NoCertificates,
    #[display("PEM data contains no private key")]
    NoPrivateKey,
    #[display("certificate or key rejected: {source}")]
    Rustls { source: rustls::Error },
}

#[derive(Clone)]
pub enum Transport {
    Plain,
    Tls(TlsAcceptor),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Plain => f.write_str("Plain"),
            Transport::Tls(_) => f.write_str("Tls"),
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

impl Transport {
    /// Loads a PEM certificate chain and private key from disk.
    pub fn tls_from_pem_files(cert: &Path, key: &Path) -> Result<Self, TlsError> {
        info!(
            "Loading TLS certificate {} and key {}",
            cert.display(),
            key.display()
        );
        Self::tls_from_pem(&read_file(cert)?, &read_file(key)?)
    }

    pub fn tls_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, TlsError> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut Cursor::new(cert_pem))
            .collect::<Result<_, _>>()
            .map_err(|source| TlsError::Pem { source })?;
        if certs.is_empty() {
            return Err(TlsError::NoCertificates);
        }

        let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut Cursor::new(key_pem))
            .map_err(|source| TlsError::Pem { source })?
            .ok_or(TlsError::NoPrivateKey)?;

        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|source| TlsError::Rustls { source })?;

        Ok(Transport::Tls(TlsAcceptor::from(Arc::new(config))))
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// Turns an accepted socket into a connection, running the TLS handshake if needed.
    pub async fn establish(&self, stream: TcpStream) -> io::Result<BoxedConnection> {
        match self {
            Transport::Plain => Ok(Box::new(stream)),
            Transport::Tls(acceptor) => {
                let stream = acceptor.accept(stream).await?;
                debug!("TLS handshake completed");
                Ok(Box::new(stream))
            }
        }
    }
}
