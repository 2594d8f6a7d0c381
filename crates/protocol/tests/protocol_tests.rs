//! Integration tests for the USB vocabulary
//!
//! Covers endpoint address decomposition, control setup decoding and the
//! libusb error code mapping as seen by crates depending on `protocol`.

use proptest::prelude::*;
use protocol::{
    ControlSetup, Direction, EndpointAddress, Recipient, RequestKind, TransferStatus, UsbError,
    error_name,
};

mod endpoint_addressing {
    use super::*;

    proptest! {
        #[test]
        fn prop_direction_follows_high_bit(raw in any::<u8>()) {
            let ep = EndpointAddress(raw);
            let expected = if raw & 0x80 != 0 { Direction::In } else { Direction::Out };
            prop_assert_eq!(ep.direction(), expected);
            prop_assert_eq!(ep.number(), raw & 0x7f);
        }

        #[test]
        fn prop_new_rebuilds_address(raw in any::<u8>()) {
            let ep = EndpointAddress(raw);
            prop_assert_eq!(EndpointAddress::new(ep.number(), ep.direction()), ep);
        }
    }

    #[test]
    fn test_display_is_hex() {
        assert_eq!(EndpointAddress(0x81).to_string(), "0x81");
        assert_eq!(EndpointAddress(0x02).to_string(), "0x02");
    }
}

mod control_setup {
    use super::*;

    fn setup(request_type: u8) -> ControlSetup {
        ControlSetup {
            request_type,
            request: 0,
            value: 0,
            index: 0,
            length: 0,
        }
    }

    #[test]
    fn test_standard_get_descriptor() {
        let s = setup(0x80);
        assert_eq!(s.direction(), Direction::In);
        assert_eq!(s.kind(), RequestKind::Standard);
        assert_eq!(s.recipient(), Recipient::Device);
    }

    #[test]
    fn test_vendor_out_to_endpoint() {
        let s = setup(0x42);
        assert_eq!(s.direction(), Direction::Out);
        assert_eq!(s.kind(), RequestKind::Vendor);
        assert_eq!(s.recipient(), Recipient::Endpoint);
    }

    #[test]
    fn test_reserved_fields() {
        let s = setup(0x60 | 0x07);
        assert_eq!(s.kind(), RequestKind::Reserved);
        assert_eq!(s.recipient(), Recipient::Reserved(7));
    }
}

mod status_vocabulary {
    use super::*;

    #[test]
    fn test_error_status_is_terminal() {
        let status = TransferStatus::Error(UsbError::Timeout);
        assert!(status.is_terminal());
        assert_ne!(status, TransferStatus::Completed);
    }

    #[test]
    fn test_error_names_match_codes() {
        assert_eq!(error_name(UsbError::Busy.code()), "LIBUSB_ERROR_BUSY");
        assert_eq!(error_name(UsbError::Pipe.code()), "LIBUSB_ERROR_PIPE");
        assert_eq!(
            error_name(UsbError::NotSupported.code()),
            "LIBUSB_ERROR_NOT_SUPPORTED"
        );
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(UsbError::InvalidParam.to_string(), "Invalid parameter");
        let err = UsbError::Other {
            message: "bridge gone".to_string(),
        };
        assert!(err.to_string().contains("bridge gone"));
    }
}
