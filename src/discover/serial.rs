//! Serial port enumeration: list locally attached ports and flag the ones
//! whose USB identity or product string looks like a machine this crate
//! can drive.

use super::{ConnectionParams, DeviceDescriptor, TransportProtocol};
use crate::{
    connection::serial::DEFAULT_BAUD, error::MachineError, profile::MachineCategory,
    traits::Discover,
};
use std::collections::HashMap;
use tokio::sync::mpsc::Sender;
use tokio_serial::{SerialPortInfo, SerialPortType, UsbPortInfo};

macro_rules! known_hardware {
    ($(
        $name:ident($vid:expr, $pid:expr, $label:expr, $category:ident, $baud:expr)
    ),+ $(,)?) => {
        /// USB identities this crate recognizes on sight. First table entry
        /// that matches wins, so specific products sit above their vendor's
        /// catch-all row.
        #[derive(Clone, Copy, Debug, Eq, PartialEq)]
        pub enum KnownHardware {
            $(
                /// A recognized USB identity.
                $name,
            )*
        }

        impl KnownHardware {
            /// Match a vendor/product id pair against the table. A table row
            /// with no product id matches every product from that vendor.
            pub fn for_ids(vid: u16, pid: u16) -> Option<Self> {
                $(
                    {
                        let known_pid: Option<u16> = $pid;
                        if vid == $vid && known_pid.map_or(true, |known| pid == known) {
                            return Some(Self::$name);
                        }
                    }
                )*
                None
            }

            /// Label for the hardware.
            pub fn label(&self) -> &'static str {
                match self {
                    $(Self::$name => $label,)*
                }
            }

            /// The category machines with this identity usually are.
            pub fn category(&self) -> MachineCategory {
                match self {
                    $(Self::$name => MachineCategory::$category,)*
                }
            }

            /// Line speed the hardware expects.
            pub fn baud(&self) -> u32 {
                match self {
                    $(Self::$name => $baud,)*
                }
            }
        }
    };
}

known_hardware!(
    PrusaMk3(0x2c99, Some(0x0002), "Prusa i3 MK3", FdmPrinter, 115_200),
    PrusaGeneric(0x2c99, None, "Prusa printer", FdmPrinter, 115_200),
    RamboBoard(0x27b1, None, "UltiMachine RAMBo", FdmPrinter, 115_200),
    Ch340Bridge(0x1a86, Some(0x7523), "CH340 serial bridge", FdmPrinter, 115_200),
    FtdiBridge(0x0403, Some(0x6001), "FTDI serial bridge", FdmPrinter, 115_200),
);

/// Guess a category from the advertised product string. Checked most
/// specific first: plenty of lasers and mills introduce themselves as grbl.
fn category_from_product(product: &str) -> Option<MachineCategory> {
    let product = product.to_lowercase();
    if product.contains("laser") {
        return Some(MachineCategory::Laser);
    }
    for needle in ["grbl", "cnc", "mill", "router"] {
        if product.contains(needle) {
            return Some(MachineCategory::Cnc);
        }
    }
    for needle in ["marlin", "prusa", "ender", "creality", "ultimaker", "3d printer"] {
        if product.contains(needle) {
            return Some(MachineCategory::FdmPrinter);
        }
    }
    None
}

/// Enumerates locally attached serial ports. Ports with no USB identity, or
/// an identity nothing recognizes, are skipped unless the strategy was told
/// to keep them.
#[derive(Clone, Copy, Debug)]
pub struct SerialPortDiscover {
    include_unrecognized: bool,
}

impl SerialPortDiscover {
    /// A port scanner. With `include_unrecognized`, ports that match no
    /// signature are still reported as generic printers.
    pub fn new(include_unrecognized: bool) -> Self {
        Self {
            include_unrecognized,
        }
    }

    fn classify(&self, port: &SerialPortInfo) -> Option<DeviceDescriptor> {
        let SerialPortType::UsbPort(usb) = &port.port_type else {
            // Non-USB ports carry no identity to match against.
            return None;
        };
        self.descriptor_for(&port.port_name, usb)
    }

    fn descriptor_for(&self, port_name: &str, usb: &UsbPortInfo) -> Option<DeviceDescriptor> {
        let hardware = KnownHardware::for_ids(usb.vid, usb.pid);
        let from_product = usb.product.as_deref().and_then(category_from_product);
        // The product string outranks the table: bridge chips front all
        // kinds of controllers.
        let category = match from_product.or_else(|| hardware.map(|hardware| hardware.category())) {
            Some(category) => category,
            None if self.include_unrecognized => MachineCategory::FdmPrinter,
            None => return None,
        };
        let label = usb
            .product
            .clone()
            .or_else(|| hardware.map(|hardware| hardware.label().to_owned()))
            .unwrap_or_else(|| "serial device".to_owned());
        let baud = hardware.map_or(DEFAULT_BAUD, |hardware| hardware.baud());

        let mut metadata = HashMap::from([
            ("vid".to_owned(), format!("{:04x}", usb.vid)),
            ("pid".to_owned(), format!("{:04x}", usb.pid)),
        ]);
        if let Some(serial_number) = &usb.serial_number {
            metadata.insert("serial_number".to_owned(), serial_number.clone());
        }
        if let Some(manufacturer) = &usb.manufacturer {
            metadata.insert("manufacturer".to_owned(), manufacturer.clone());
        }

        Some(DeviceDescriptor {
            id: port_name.to_owned(),
            label,
            category,
            protocol: TransportProtocol::Serial,
            params: ConnectionParams::Serial {
                port: port_name.to_owned(),
                baud,
            },
            metadata,
        })
    }
}

impl Discover for SerialPortDiscover {
    type Error = MachineError;

    async fn discover(&self, found: Sender<DeviceDescriptor>) -> Result<(), MachineError> {
        let ports = tokio_serial::available_ports().map_err(|err| {
            MachineError::Connection(format!("can not enumerate serial ports: {err}"))
        })?;
        tracing::debug!(ports = ports.len(), "scanning serial ports");
        for port in ports {
            let Some(descriptor) = self.classify(&port) else {
                tracing::trace!(port = %port.port_name, "skipping unrecognized port");
                continue;
            };
            if found.send(descriptor).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn specific_products_outrank_the_vendor_catch_all() {
        assert_eq!(
            KnownHardware::for_ids(0x2c99, 0x0002),
            Some(KnownHardware::PrusaMk3)
        );
        assert_eq!(
            KnownHardware::for_ids(0x2c99, 0x000d),
            Some(KnownHardware::PrusaGeneric)
        );
    }

    #[test]
    fn bridge_chips_are_in_the_table() {
        assert_eq!(
            KnownHardware::for_ids(0x1a86, 0x7523),
            Some(KnownHardware::Ch340Bridge)
        );
        assert_eq!(
            KnownHardware::for_ids(0x0403, 0x6001),
            Some(KnownHardware::FtdiBridge)
        );
        assert_eq!(KnownHardware::for_ids(0x0000, 0x0000), None);
    }

    #[test]
    fn product_strings_guess_the_category() {
        assert_eq!(
            category_from_product("GRBL 1.1h controller"),
            Some(MachineCategory::Cnc)
        );
        assert_eq!(
            category_from_product("Sculpfun laser engraver"),
            Some(MachineCategory::Laser)
        );
        assert_eq!(
            category_from_product("Original Prusa i3 MK3"),
            Some(MachineCategory::FdmPrinter)
        );
        assert_eq!(category_from_product("USB2.0 Hub"), None);
    }

    #[test]
    fn grbl_fronted_lasers_classify_as_lasers() {
        assert_eq!(
            category_from_product("grbl laser module"),
            Some(MachineCategory::Laser)
        );
    }
}
