// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use std::fs::File;
use std::io::{self, BufReader};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{self, OwnedTrustAnchor, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;

use crate::connect_options::{ConnectOptions, TlsType, Transport};
use crate::error::{Error, ErrorKind};

/// The transport byte stream under a connection: plain TCP or TLS over
/// TCP. Owned exclusively by the reader/writer pair after the split.
pub(crate) enum Stream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

fn root_store(tls_type: &TlsType) -> Result<RootCertStore, Error> {
    let mut roots = RootCertStore::empty();
    match tls_type {
        TlsType::CaSigned => {
            roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
                OwnedTrustAnchor::from_subject_spki_name_constraints(
                    ta.subject,
                    ta.spki,
                    ta.name_constraints,
                )
            }));
        }
        TlsType::SelfSigned { root_ca_pem } => {
            let file = File::open(root_ca_pem).map_err(|err| {
                Error::from_string(
                    ErrorKind::ConfigError,
                    format!("Failed to open root ca {}: {err}", root_ca_pem.display()),
                )
            })?;
            let certs = rustls_pemfile::certs(&mut BufReader::new(file)).map_err(|err| {
                Error::from_string(ErrorKind::ConfigError, format!("Invalid root ca pem: {err}"))
            })?;
            for cert in certs {
                roots.add(&rustls::Certificate(cert)).map_err(|err| {
                    Error::from_string(
                        ErrorKind::ConfigError,
                        format!("Rustls rejected root ca: {err}"),
                    )
                })?;
            }
        }
    }
    Ok(roots)
}

impl Stream {
    /// Open the transport named by `options`.
    pub(crate) async fn connect(options: &ConnectOptions) -> Result<Self, Error> {
        let address = (options.host(), options.port());
        match options.transport() {
            Transport::Tcp => {
                let socket = TcpStream::connect(address).await?;
                socket.set_nodelay(true)?;
                Ok(Self::Tcp(socket))
            }
            Transport::Tls => {
                let roots = root_store(options.tls_type())?;
                let config = rustls::ClientConfig::builder()
                    .with_safe_defaults()
                    .with_root_certificates(roots)
                    .with_no_client_auth();
                let connector = TlsConnector::from(Arc::new(config));
                let domain = ServerName::try_from(options.host()).map_err(|err| {
                    Error::from_string(
                        ErrorKind::ConfigError,
                        format!("Invalid tls server name {}: {err}", options.host()),
                    )
                })?;
                let socket = TcpStream::connect(address).await?;
                socket.set_nodelay(true)?;
                let tls = connector.connect(domain, socket).await?;
                Ok(Self::Tls(Box::new(tls)))
            }
        }
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(socket) => Pin::new(socket).poll_read(cx, buf),
            Self::Tls(socket) => Pin::new(socket.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(socket) => Pin::new(socket).poll_write(cx, buf),
            Self::Tls(socket) => Pin::new(socket.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(socket) => Pin::new(socket).poll_flush(cx),
            Self::Tls(socket) => Pin::new(socket.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(socket) => Pin::new(socket).poll_shutdown(cx),
            Self::Tls(socket) => Pin::new(socket.as_mut()).poll_shutdown(cx),
        }
    }
}
