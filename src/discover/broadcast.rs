//! Bounded listen for UDP service announcements. Print servers on the
//! local network advertise themselves with SSDP-style `NOTIFY` frames;
//! one pass binds the announcement port, collects frames for a short
//! window and reports every recognizable service it heard.

use super::{ConnectionParams, DeviceDescriptor, TransportProtocol};
use crate::{error::MachineError, profile::MachineCategory, traits::Discover};
use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};
use tokio::{net::UdpSocket, sync::mpsc::Sender};

/// The port well-known service announcements arrive on.
pub const DEFAULT_PORT: u16 = 1900;

/// How long one pass listens before giving up.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3);

/// Listens for service announcement datagrams for a bounded window.
#[derive(Clone, Copy, Debug)]
pub struct BroadcastDiscover {
    port: u16,
    window: Duration,
}

impl BroadcastDiscover {
    /// A listener on `port` that collects frames for `window` per pass.
    pub fn new(port: u16, window: Duration) -> Self {
        Self { port, window }
    }
}

impl Default for BroadcastDiscover {
    fn default() -> Self {
        Self::new(DEFAULT_PORT, DEFAULT_WINDOW)
    }
}

impl Discover for BroadcastDiscover {
    type Error = MachineError;

    async fn discover(&self, found: Sender<DeviceDescriptor>) -> Result<(), MachineError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.port))
            .await
            .map_err(|err| {
                MachineError::Connection(format!(
                    "can not bind udp port {}: {err}",
                    self.port
                ))
            })?;
        tracing::debug!(port = self.port, window = ?self.window, "listening for announcements");

        let deadline = tokio::time::Instant::now() + self.window;
        let mut frame = [0u8; 1536];
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            let received = match tokio::time::timeout(remaining, socket.recv_from(&mut frame)).await
            {
                Err(_) => break,
                Ok(Err(err)) => {
                    return Err(MachineError::Connection(format!(
                        "udp receive failed: {err}"
                    )))
                }
                Ok(Ok(received)) => received,
            };
            let (len, peer) = received;
            // Announcements are ASCII; anything else lossy-decodes to
            // garbage and fails the header check below.
            let payload = String::from_utf8_lossy(&frame[..len]);
            if let Some(descriptor) = parse_announcement(&payload, peer.ip()) {
                if found.send(descriptor).await.is_err() {
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Parse one announcement frame. `source` fills in for a missing
/// `Location` token, since the datagram's sender usually is the device.
fn parse_announcement(payload: &str, source: IpAddr) -> Option<DeviceDescriptor> {
    let mut lines = payload.lines().filter_map(|line| {
        let line = line.trim();
        (!line.is_empty()).then_some(line)
    });

    let header = lines.next()?;
    if header != "NOTIFY * HTTP/1.1" {
        tracing::trace!(header = %header, "not an announcement, ignoring");
        return None;
    }

    let mut service = None;
    let mut address = None;
    let mut port = None;
    let mut name = None;
    let mut serial = None;
    for line in lines {
        let Some((token, rest)) = line.split_once(':') else {
            tracing::trace!(line = %line, "bad token line");
            continue;
        };
        let rest = rest.trim();
        match token.trim() {
            "NT" => service = Some(rest.to_owned()),
            "Location" => address = Some(rest.to_owned()),
            "Port" => port = rest.parse::<u16>().ok(),
            "Name" => name = Some(rest.to_owned()),
            "USN" => serial = Some(rest.to_owned()),
            _ => (),
        }
    }

    let service = service?;
    let protocol = if service.to_lowercase().contains("octoprint") {
        TransportProtocol::OctoPrint
    } else if service.to_lowercase().contains("prusalink") {
        TransportProtocol::PrusaLink
    } else {
        tracing::trace!(service = %service, "unknown service type");
        return None;
    };

    let address = address.unwrap_or_else(|| source.to_string());
    let port = port.unwrap_or(80);
    let id = format!("{address}:{port}");
    let label = name.unwrap_or_else(|| format!("{protocol} at {address}"));

    let mut metadata = HashMap::from([("service".to_owned(), service)]);
    if let Some(serial) = serial {
        metadata.insert("serial_number".to_owned(), serial);
    }

    Some(DeviceDescriptor {
        id: id.clone(),
        label,
        category: MachineCategory::FdmPrinter,
        protocol,
        params: ConnectionParams::Http {
            base_url: format!("http://{address}:{port}"),
            api_key: None,
            username: None,
            password: None,
        },
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use testresult::TestResult;
    use tokio::sync::mpsc;

    const SOURCE: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));

    #[test]
    fn a_full_announcement_becomes_a_descriptor() {
        let frame = "NOTIFY * HTTP/1.1\r\n\
                     NT: urn:octoprint-org:service:workhorse:1\r\n\
                     Location: 10.0.0.42\r\n\
                     Port: 5000\r\n\
                     Name: Voron 2.4\r\n\
                     USN: vor-2400-017\r\n";
        let descriptor = parse_announcement(frame, SOURCE).unwrap();
        assert_eq!(descriptor.id, "10.0.0.42:5000");
        assert_eq!(descriptor.label, "Voron 2.4");
        assert_eq!(descriptor.protocol, TransportProtocol::OctoPrint);
        assert_eq!(
            descriptor.params,
            ConnectionParams::Http {
                base_url: "http://10.0.0.42:5000".to_owned(),
                api_key: None,
                username: None,
                password: None,
            }
        );
        assert_eq!(
            descriptor.metadata.get("serial_number"),
            Some(&"vor-2400-017".to_owned())
        );
    }

    #[test]
    fn the_sender_address_fills_in_for_a_missing_location() {
        let frame = "NOTIFY * HTTP/1.1\r\nNT: prusalink\r\n";
        let descriptor = parse_announcement(frame, SOURCE).unwrap();
        assert_eq!(descriptor.id, "10.0.0.7:80");
        assert_eq!(descriptor.protocol, TransportProtocol::PrusaLink);
        assert_eq!(descriptor.label, "prusa_link at 10.0.0.7");
    }

    #[test]
    fn other_ssdp_chatter_is_ignored() {
        assert!(parse_announcement("M-SEARCH * HTTP/1.1\r\nNT: octoprint\r\n", SOURCE).is_none());
        assert!(
            parse_announcement("NOTIFY * HTTP/1.1\r\nNT: mediaserver\r\n", SOURCE).is_none()
        );
        assert!(parse_announcement("", SOURCE).is_none());
    }

    #[tokio::test]
    async fn hears_a_real_datagram_on_the_wire() -> TestResult {
        let port = portpicker::pick_unused_port().ok_or("no free udp port")?;
        let strategy = BroadcastDiscover::new(port, Duration::from_millis(500));
        let (found, mut sightings) = mpsc::channel(8);
        let scan = tokio::spawn(async move { strategy.discover(found).await });

        // Give the listener a beat to bind before sending.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let sender = UdpSocket::bind("127.0.0.1:0").await?;
        let frame = "NOTIFY * HTTP/1.1\r\nNT: octoprint\r\nPort: 5000\r\nName: Voron 2.4\r\n";
        sender.send_to(frame.as_bytes(), ("127.0.0.1", port)).await?;

        let descriptor = sightings.recv().await.ok_or("no descriptor heard")?;
        assert_eq!(descriptor.id, "127.0.0.1:5000");
        assert_eq!(descriptor.label, "Voron 2.4");
        scan.await??;
        Ok(())
    }
}
