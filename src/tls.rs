use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

use crate::config::TlsPaths;

/// Build the acceptor for the configured certificate pair, if any.
pub fn load_tls_acceptor(paths: Option<&TlsPaths>) -> io::Result<Option<TlsAcceptor>> {
    let Some(paths) = paths else { return Ok(None) };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(&paths.cert)?))
        .collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("no certificates found in {}", paths.cert.display()),
        ));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(&paths.key)?))?
        .ok_or_else(|| {
            io::Error::new(
                ErrorKind::InvalidInput,
                format!("no private key found in {}", paths.key.display()),
            )
        })?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_paths_means_plaintext() {
        assert!(load_tls_acceptor(None).unwrap().is_none());
    }

    #[test]
    fn missing_cert_file_is_an_error() {
        let paths = TlsPaths {
            cert: "/nonexistent/tabula-cert.pem".into(),
            key: "/nonexistent/tabula-key.pem".into(),
        };
        match load_tls_acceptor(Some(&paths)) {
            Err(e) => assert_eq!(e.kind(), ErrorKind::NotFound),
            Ok(_) => panic!("expected a missing cert file to fail"),
        }
    }
}
