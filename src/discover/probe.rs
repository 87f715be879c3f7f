//! Active network probe: ask configured hosts for their version over HTTP
//! and fingerprint whoever answers. Slow by nature, so it is disabled by
//! default and bounded both per request and in how many probes fly at
//! once.

use super::{ConnectionParams, DeviceDescriptor, TransportProtocol};
use crate::{error::MachineError, profile::MachineCategory, traits::Discover};
use futures::stream::{self, StreamExt};
use std::{collections::HashMap, time::Duration};
use tokio::sync::mpsc::Sender;

/// The path whose body identifies a print server.
const PROBE_PATH: &str = "/api/version";

/// How many probes fly at once.
const PROBE_CONCURRENCY: usize = 8;

/// Probes every configured host and port pair for a known print server.
pub struct ProbeDiscover {
    hosts: Vec<String>,
    ports: Vec<u16>,
    timeout: Duration,
}

impl ProbeDiscover {
    /// A probe across the cartesian product of `hosts` and `ports`, each
    /// request bounded by `timeout`.
    pub fn new(hosts: Vec<String>, ports: Vec<u16>, timeout: Duration) -> Self {
        Self {
            hosts,
            ports,
            timeout,
        }
    }
}

impl Discover for ProbeDiscover {
    type Error = MachineError;

    async fn discover(&self, found: Sender<DeviceDescriptor>) -> Result<(), MachineError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| {
                MachineError::Connection(format!("can not build probe client: {err}"))
            })?;

        let targets: Vec<(String, u16)> = self
            .hosts
            .iter()
            .flat_map(|host| self.ports.iter().map(move |port| (host.clone(), *port)))
            .collect();
        tracing::debug!(targets = targets.len(), "probing for print servers");

        let mut probes = stream::iter(targets)
            .map(|(host, port)| {
                let client = client.clone();
                async move { probe_one(&client, &host, port).await }
            })
            .buffer_unordered(PROBE_CONCURRENCY);

        while let Some(hit) = probes.next().await {
            if let Some(descriptor) = hit {
                if found.send(descriptor).await.is_err() {
                    break;
                }
            }
        }
        Ok(())
    }
}

async fn probe_one(client: &reqwest::Client, host: &str, port: u16) -> Option<DeviceDescriptor> {
    let url = format!("http://{host}:{port}{PROBE_PATH}");
    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(err) => {
            tracing::trace!(url = %url, error = %err, "probe got no answer");
            return None;
        }
    };
    if !response.status().is_success() {
        tracing::trace!(url = %url, status = %response.status(), "probe refused");
        return None;
    }
    let body = response.text().await.ok()?;
    let protocol = fingerprint(&body)?;
    tracing::debug!(host, port, protocol = %protocol, "probe hit");

    Some(DeviceDescriptor {
        id: format!("{host}:{port}"),
        label: format!("{protocol} at {host}"),
        category: MachineCategory::FdmPrinter,
        protocol,
        params: ConnectionParams::Http {
            base_url: format!("http://{host}:{port}"),
            api_key: None,
            username: None,
            password: None,
        },
        metadata: HashMap::from([("probe_path".to_owned(), PROBE_PATH.to_owned())]),
    })
}

/// Match a version body against known vendor signatures.
fn fingerprint(body: &str) -> Option<TransportProtocol> {
    let body = body.to_lowercase();
    if body.contains("octoprint") {
        return Some(TransportProtocol::OctoPrint);
    }
    if body.contains("prusalink") || body.contains("prusa-link") {
        return Some(TransportProtocol::PrusaLink);
    }
    None
}
