//! Device and configuration descriptors
//!
//! Plain data handed over by the host bridge. Descriptors are not parsed back
//! from raw bytes; [`DeviceDescriptor::to_bytes`] and
//! [`ConfigDescriptor::to_bytes`] produce the standard USB wire layout for
//! callers that expect raw descriptor blobs.

use crate::types::EndpointAddress;
use serde::Serialize;

pub const DEVICE_DESCRIPTOR_LENGTH: u8 = 18;
pub const CONFIG_DESCRIPTOR_LENGTH: u8 = 9;
pub const INTERFACE_DESCRIPTOR_LENGTH: u8 = 9;
pub const ENDPOINT_DESCRIPTOR_LENGTH: u8 = 7;

pub const DT_DEVICE: u8 = 1;
pub const DT_CONFIG: u8 = 2;
pub const DT_INTERFACE: u8 = 4;
pub const DT_ENDPOINT: u8 = 5;

/// Fixed string descriptor indexes used by bridges that synthesize descriptors
pub const STRING_INDEX_MANUFACTURER: u8 = 1;
pub const STRING_INDEX_PRODUCT: u8 = 2;
pub const STRING_INDEX_SERIAL_NUMBER: u8 = 3;
pub const STRING_INDEX_CONFIG: u8 = 4;
pub const STRING_INDEX_INTERFACE: u8 = 5;

/// Standard device descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// bcdUSB
    pub usb_version: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    /// bMaxPacketSize0
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// bcdDevice
    pub device_version: u16,
    pub manufacturer_index: u8,
    pub product_index: u8,
    pub serial_number_index: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub fn to_bytes(&self) -> [u8; DEVICE_DESCRIPTOR_LENGTH as usize] {
        let usb = self.usb_version.to_le_bytes();
        let vid = self.vendor_id.to_le_bytes();
        let pid = self.product_id.to_le_bytes();
        let bcd = self.device_version.to_le_bytes();
        [
            DEVICE_DESCRIPTOR_LENGTH,
            DT_DEVICE,
            usb[0],
            usb[1],
            self.class,
            self.subclass,
            self.protocol,
            self.max_packet_size0,
            vid[0],
            vid[1],
            pid[0],
            pid[1],
            bcd[0],
            bcd[1],
            self.manufacturer_index,
            self.product_index,
            self.serial_number_index,
            self.num_configurations,
        ]
    }
}

/// Endpoint descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointDescriptor {
    pub address: EndpointAddress,
    /// bmAttributes
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

/// One alternate setting of an interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub alternate_setting: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub interface_index: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// Configuration descriptor with its interfaces (every alternate setting)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigDescriptor {
    pub configuration_value: u8,
    pub configuration_index: u8,
    /// bmAttributes
    pub attributes: u8,
    pub max_power: u8,
    pub interfaces: Vec<InterfaceDescriptor>,
}

impl ConfigDescriptor {
    /// Number of distinct interface numbers (bNumInterfaces)
    pub fn num_interfaces(&self) -> u8 {
        let mut numbers: Vec<u8> = self.interfaces.iter().map(|i| i.number).collect();
        numbers.sort_unstable();
        numbers.dedup();
        numbers.len() as u8
    }

    /// wTotalLength of the serialized descriptor set
    pub fn total_length(&self) -> u16 {
        let endpoints: usize = self.interfaces.iter().map(|i| i.endpoints.len()).sum();
        (CONFIG_DESCRIPTOR_LENGTH as usize
            + self.interfaces.len() * INTERFACE_DESCRIPTOR_LENGTH as usize
            + endpoints * ENDPOINT_DESCRIPTOR_LENGTH as usize) as u16
    }

    /// Serialize the configuration, interface and endpoint descriptors
    pub fn to_bytes(&self) -> Vec<u8> {
        let total = self.total_length();
        let mut out = Vec::with_capacity(total as usize);
        out.extend_from_slice(&[
            CONFIG_DESCRIPTOR_LENGTH,
            DT_CONFIG,
            total.to_le_bytes()[0],
            total.to_le_bytes()[1],
            self.num_interfaces(),
            self.configuration_value,
            self.configuration_index,
            self.attributes,
            self.max_power,
        ]);

        for iface in &self.interfaces {
            out.extend_from_slice(&[
                INTERFACE_DESCRIPTOR_LENGTH,
                DT_INTERFACE,
                iface.number,
                iface.alternate_setting,
                iface.endpoints.len() as u8,
                iface.class,
                iface.subclass,
                iface.protocol,
                iface.interface_index,
            ]);
            for ep in &iface.endpoints {
                let mps = ep.max_packet_size.to_le_bytes();
                out.extend_from_slice(&[
                    ENDPOINT_DESCRIPTOR_LENGTH,
                    DT_ENDPOINT,
                    ep.address.0,
                    ep.attributes,
                    mps[0],
                    mps[1],
                    ep.interval,
                ]);
            }
        }

        out
    }
}
