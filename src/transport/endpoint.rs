//! Where the broker lives and how to reach it.
//!
//! Accepted address forms: `host:port`, `[ipv6]:port`, optionally prefixed by
//! `mqtt://` / `tcp://` (plain) or `mqtts://` / `ssl://` (TLS).

use anyhow::{bail, ensure, Context, Result};
use rumqttc::Transport;
use std::net::IpAddr;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl MqttEndpoint {
    /// Parse a broker address. `force_tls` upgrades scheme-less and plain addresses.
    pub fn parse(addr: &str, force_tls: bool) -> Result<Self> {
        let addr = addr.trim();
        let (use_tls, authority) = match addr.split_once("://") {
            None => (force_tls, addr),
            Some(("mqtt" | "tcp", rest)) => (force_tls, rest),
            Some(("mqtts" | "ssl", rest)) => (true, rest),
            Some((scheme, _)) => bail!("unsupported MQTT scheme '{}' in {}", scheme, addr),
        };
        let split = match authority.strip_prefix('[') {
            Some(bracketed) => bracketed.split_once("]:"),
            None => authority.rsplit_once(':'),
        };
        let Some((host, port)) = split else {
            bail!("MQTT broker address needs host:port, got {}", addr);
        };
        ensure!(!host.is_empty(), "missing MQTT host in {}", addr);
        let port = port
            .parse::<u16>()
            .with_context(|| format!("invalid MQTT port in {}", addr))?;
        Ok(Self {
            host: host.to_string(),
            port,
            use_tls,
        })
    }

    pub fn is_loopback(&self) -> bool {
        self.host == "localhost"
            || self
                .host
                .parse::<IpAddr>()
                .is_ok_and(|ip| ip.is_loopback())
    }

    /// Refuse remote brokers unless the operator opted in.
    pub fn require_loopback(&self, allow_remote: bool) -> Result<()> {
        ensure!(
            allow_remote || self.is_loopback(),
            "MQTT broker {}:{} is not loopback (use --allow-remote-mqtt to override)",
            self.host,
            self.port
        );
        Ok(())
    }

    /// Plain TCP, TLS with the bundled roots, or TLS with the given PEM material.
    pub fn transport(&self, tls: &TlsMaterials) -> Result<Transport> {
        if !self.use_tls {
            ensure!(
                tls.ca.is_none() && tls.client_auth.is_none(),
                "MQTT TLS material given for a plain connection (use --mqtt-use-tls or mqtts://)"
            );
            return Ok(Transport::tcp());
        }
        match (&tls.ca, &tls.client_auth) {
            (None, None) => Ok(Transport::tls_with_default_config()),
            (Some(ca), auth) => Ok(Transport::tls(ca.clone(), auth.clone(), None)),
            (None, Some(_)) => bail!("MQTT client certificates need a CA certificate"),
        }
    }
}

/// PEM material for TLS connections.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    pub ca: Option<Vec<u8>>,
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    pub fn load(ca: Option<&Path>, cert: Option<&Path>, key: Option<&Path>) -> Result<Self> {
        let client_auth = match (cert, key) {
            (Some(cert), Some(key)) => Some((
                read_pem(cert, "client cert")?,
                read_pem(key, "client key")?,
            )),
            (None, None) => None,
            _ => bail!("MQTT TLS client certificate and key must be given together"),
        };
        Ok(Self {
            ca: ca.map(|path| read_pem(path, "CA")).transpose()?,
            client_auth,
        })
    }
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path)
        .with_context(|| format!("failed to read MQTT TLS {} '{}'", what, path.display()))
}
