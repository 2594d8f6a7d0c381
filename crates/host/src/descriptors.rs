//! rusb descriptor conversion

use protocol::{
    ConfigDescriptor, DeviceDescriptor, EndpointAddress, EndpointDescriptor, InterfaceDescriptor,
};

/// Encode a rusb version as binary-coded decimal (bcdUSB / bcdDevice)
pub fn version_to_bcd(version: rusb::Version) -> u16 {
    let major = u16::from(version.major());
    let minor = u16::from(version.minor()) & 0x0f;
    let sub_minor = u16::from(version.sub_minor()) & 0x0f;
    ((major / 10) << 12) | ((major % 10) << 8) | (minor << 4) | sub_minor
}

pub fn map_device_descriptor(desc: &rusb::DeviceDescriptor) -> DeviceDescriptor {
    DeviceDescriptor {
        usb_version: version_to_bcd(desc.usb_version()),
        class: desc.class_code(),
        subclass: desc.sub_class_code(),
        protocol: desc.protocol_code(),
        max_packet_size0: desc.max_packet_size(),
        vendor_id: desc.vendor_id(),
        product_id: desc.product_id(),
        device_version: version_to_bcd(desc.device_version()),
        manufacturer_index: desc.manufacturer_string_index().unwrap_or(0),
        product_index: desc.product_string_index().unwrap_or(0),
        serial_number_index: desc.serial_number_string_index().unwrap_or(0),
        num_configurations: desc.num_configurations(),
    }
}

pub fn map_config_descriptor(desc: &rusb::ConfigDescriptor) -> ConfigDescriptor {
    // bit 7 is reserved and always set
    let mut attributes = 0x80;
    if desc.self_powered() {
        attributes |= 0x40;
    }
    if desc.remote_wakeup() {
        attributes |= 0x20;
    }

    let interfaces = desc
        .interfaces()
        .flat_map(|interface| interface.descriptors())
        .map(|alt| InterfaceDescriptor {
            number: alt.interface_number(),
            alternate_setting: alt.setting_number(),
            class: alt.class_code(),
            subclass: alt.sub_class_code(),
            protocol: alt.protocol_code(),
            interface_index: alt.description_string_index().unwrap_or(0),
            endpoints: alt.endpoint_descriptors().map(|e| map_endpoint(&e)).collect(),
        })
        .collect();

    ConfigDescriptor {
        configuration_value: desc.number(),
        configuration_index: desc.description_string_index().unwrap_or(0),
        attributes,
        // bMaxPower is in 2 mA units
        max_power: u8::try_from(desc.max_power() / 2).unwrap_or(u8::MAX),
        interfaces,
    }
}

fn map_endpoint(desc: &rusb::EndpointDescriptor) -> EndpointDescriptor {
    EndpointDescriptor {
        address: EndpointAddress(desc.address()),
        attributes: endpoint_attributes(desc),
        max_packet_size: desc.max_packet_size(),
        interval: desc.interval(),
    }
}

/// Rebuild bmAttributes from rusb's decoded fields
fn endpoint_attributes(desc: &rusb::EndpointDescriptor) -> u8 {
    let transfer = match desc.transfer_type() {
        rusb::TransferType::Control => 0,
        rusb::TransferType::Isochronous => 1,
        rusb::TransferType::Bulk => 2,
        rusb::TransferType::Interrupt => 3,
    };
    let sync = match desc.sync_type() {
        rusb::SyncType::NoSync => 0,
        rusb::SyncType::Asynchronous => 1,
        rusb::SyncType::Adaptive => 2,
        rusb::SyncType::Synchronous => 3,
    };
    let usage = match desc.usage_type() {
        rusb::UsageType::Data => 0,
        rusb::UsageType::Feedback => 1,
        rusb::UsageType::FeedbackData => 2,
        rusb::UsageType::Reserved => 3,
    };
    transfer | (sync << 2) | (usage << 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_to_bcd() {
        assert_eq!(version_to_bcd(rusb::Version(2, 0, 0)), 0x0200);
        assert_eq!(version_to_bcd(rusb::Version(1, 1, 0)), 0x0110);
        assert_eq!(version_to_bcd(rusb::Version(1, 0, 4)), 0x0104);
        assert_eq!(version_to_bcd(rusb::Version(10, 2, 1)), 0x1021);
    }
}
