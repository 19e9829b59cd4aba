//! Opening the byte stream a session runs over: plain TCP, TLS, or a
//! stream the caller already established.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;

use crate::client::Config;
use crate::error::{Error, Result};

/// Port conventionally used for IRC over TLS; connecting to it implies `tls`.
pub const TLS_PORT: u32 = 6697;

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Any duplex byte stream usable as a transport.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A connection that has completed TCP (and optionally TLS) but hasn't
/// started protocol registration yet.
pub enum EstablishedConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    /// Supplied by the caller, e.g. a proxy tunnel or an in-memory pipe.
    Stream(Box<dyn AsyncStream>),
}

impl EstablishedConnection {
    pub fn stream(stream: impl AsyncStream) -> Self {
        Self::Stream(Box::new(stream))
    }

    pub(crate) fn into_split(self) -> (BoxedReader, BoxedWriter) {
        match self {
            Self::Plain(tcp) => {
                let (reader, writer) = tcp.into_split();
                (Box::new(reader), Box::new(writer))
            }
            Self::Tls(tls) => {
                let (reader, writer) = tokio::io::split(*tls);
                (Box::new(reader), Box::new(writer))
            }
            Self::Stream(stream) => {
                let (reader, writer) = tokio::io::split(stream);
                (Box::new(reader), Box::new(writer))
            }
        }
    }
}

impl std::fmt::Debug for EstablishedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Plain(_) => "Plain",
            Self::Tls(_) => "Tls",
            Self::Stream(_) => "Stream",
        };
        f.debug_tuple("EstablishedConnection").field(&kind).finish()
    }
}

/// Establish a TCP (and optionally TLS) connection to the configured server.
pub async fn establish_connection(config: &Config) -> Result<EstablishedConnection> {
    let use_tls = config.tls || config.port == TLS_PORT;
    let addr = config.server_addr();
    let mode = if use_tls { "TLS" } else { "plain" };

    tracing::debug!("Resolving {addr}...");
    let port = u16::try_from(config.port)
        .map_err(|_| Error::InvalidConfig(format!("port {} out of range", config.port)))?;
    let tcp = TcpStream::connect((config.server.as_str(), port)).await?;
    tracing::debug!("TCP connected to {addr} ({mode})");

    if !use_tls {
        return Ok(EstablishedConnection::Plain(tcp));
    }

    let tls_config = if config.tls_insecure {
        tracing::debug!("TLS: insecure mode (skipping cert verification)");
        rustls_insecure_config()
    } else {
        rustls_default_config()
    };
    let connector = TlsConnector::from(Arc::new(tls_config));
    let dns_name = rustls::pki_types::ServerName::try_from(config.server.clone())?;
    let tls_stream = connector.connect(dns_name, tcp).await?;
    tracing::debug!("TLS handshake with {addr} complete");
    Ok(EstablishedConnection::Tls(Box::new(tls_stream)))
}

fn install_crypto_provider() {
    #[cfg(feature = "ring")]
    {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
    #[cfg(all(feature = "aws-lc-rs", not(feature = "ring")))]
    {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

fn rustls_default_config() -> rustls::ClientConfig {
    install_crypto_provider();

    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

fn rustls_insecure_config() -> rustls::ClientConfig {
    install_crypto_provider();
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
        .with_no_client_auth()
}

/// Accepts any certificate. Only used when `tls_insecure` is set.
#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::CryptoProvider::get_default()
            .map(|p| p.signature_verification_algorithms.supported_schemes())
            .unwrap_or_default()
    }
}
