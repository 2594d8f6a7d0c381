//! USB transfer vocabulary
//!
//! Endpoint addressing, transfer types, transfer status and control setup
//! decoding shared by the shim core and the host bridges.

use crate::error::UsbError;
use serde::Serialize;

/// Direction bit of an endpoint address or `bmRequestType`
pub const DIRECTION_IN_MASK: u8 = 0x80;

/// Endpoint number bits of an endpoint address
pub const ENDPOINT_NUMBER_MASK: u8 = 0x7f;

/// Transfer direction, relative to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

/// Endpoint address (direction bit + endpoint number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct EndpointAddress(pub u8);

impl EndpointAddress {
    /// Build an address from its parts
    pub fn new(number: u8, direction: Direction) -> Self {
        let number = number & ENDPOINT_NUMBER_MASK;
        match direction {
            Direction::In => Self(number | DIRECTION_IN_MASK),
            Direction::Out => Self(number),
        }
    }

    /// Direction taken from bit 7
    pub fn direction(self) -> Direction {
        if self.0 & DIRECTION_IN_MASK == DIRECTION_IN_MASK {
            Direction::In
        } else {
            Direction::Out
        }
    }

    /// Endpoint number taken from the low 7 bits
    pub fn number(self) -> u8 {
        self.0 & ENDPOINT_NUMBER_MASK
    }

    pub fn is_in(self) -> bool {
        self.direction() == Direction::In
    }
}

impl std::fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Transfer type declared on a transfer request
///
/// Only `Bulk` is dispatched to the host bridge. The other types are accepted
/// when filling a transfer and rejected at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
    BulkStream,
}

impl TransferType {
    /// libusb numeric transfer type
    pub fn as_raw(self) -> u8 {
        match self {
            TransferType::Control => 0,
            TransferType::Isochronous => 1,
            TransferType::Bulk => 2,
            TransferType::Interrupt => 3,
            TransferType::BulkStream => 4,
        }
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(TransferType::Control),
            1 => Some(TransferType::Isochronous),
            2 => Some(TransferType::Bulk),
            3 => Some(TransferType::Interrupt),
            4 => Some(TransferType::BulkStream),
            _ => None,
        }
    }
}

/// Lifecycle status of a transfer request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// Never submitted, or already dispatched to its callback
    Unsubmitted,
    /// Accepted by the host bridge, waiting for completion
    InFlight,
    /// Host bridge finished the I/O
    Completed,
    /// Cancelled by the caller
    Cancelled,
    /// Host bridge reported a failure
    Error(UsbError),
}

impl TransferStatus {
    /// Whether the status is eligible for callback dispatch
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Cancelled | TransferStatus::Error(_)
        )
    }
}

/// Request type part of `bmRequestType` (bits 5..6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
    Reserved,
}

/// Recipient part of `bmRequestType` (bits 0..4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
    Reserved(u8),
}

/// Control transfer setup packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSetup {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
    /// wLength
    pub length: u16,
}

impl ControlSetup {
    pub fn direction(&self) -> Direction {
        if self.request_type & DIRECTION_IN_MASK == DIRECTION_IN_MASK {
            Direction::In
        } else {
            Direction::Out
        }
    }

    pub fn kind(&self) -> RequestKind {
        match (self.request_type & 0x60) >> 5 {
            0 => RequestKind::Standard,
            1 => RequestKind::Class,
            2 => RequestKind::Vendor,
            _ => RequestKind::Reserved,
        }
    }

    pub fn recipient(&self) -> Recipient {
        match self.request_type & 0x1f {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            other => Recipient::Reserved(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_direction() {
        assert_eq!(EndpointAddress(0x81).direction(), Direction::In);
        assert_eq!(EndpointAddress(0x81).number(), 1);
        assert_eq!(EndpointAddress(0x02).direction(), Direction::Out);
        assert_eq!(EndpointAddress(0x02).number(), 2);
        assert_eq!(EndpointAddress::new(1, Direction::In), EndpointAddress(0x81));
    }

    #[test]
    fn test_terminal_status() {
        assert!(!TransferStatus::Unsubmitted.is_terminal());
        assert!(!TransferStatus::InFlight.is_terminal());
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Cancelled.is_terminal());
        assert!(TransferStatus::Error(UsbError::Pipe).is_terminal());
    }

    #[test]
    fn test_control_setup_decoding() {
        let setup = ControlSetup {
            request_type: 0xc0,
            request: 0x0e,
            value: 0,
            index: 0,
            length: 1,
        };
        assert_eq!(setup.direction(), Direction::In);
        assert_eq!(setup.kind(), RequestKind::Vendor);
        assert_eq!(setup.recipient(), Recipient::Device);

        let setup = ControlSetup {
            request_type: 0x21,
            ..setup
        };
        assert_eq!(setup.direction(), Direction::Out);
        assert_eq!(setup.kind(), RequestKind::Class);
        assert_eq!(setup.recipient(), Recipient::Interface);
    }

    #[test]
    fn test_transfer_type_raw() {
        for t in [
            TransferType::Control,
            TransferType::Isochronous,
            TransferType::Bulk,
            TransferType::Interrupt,
            TransferType::BulkStream,
        ] {
            assert_eq!(TransferType::from_raw(t.as_raw()), Some(t));
        }
        assert_eq!(TransferType::from_raw(9), None);
    }
}
