//! SIG-assigned primary service metadata
//!
//! A static catalog of the adopted primary services, for labelling a
//! discovered attribute tree.

use crate::uuid::Uuid;

/// Name and identifier of an adopted primary service.
#[derive(Debug, Clone, Copy)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub id: &'static str,
    pub uuid: u16,
}

const SERVICES: &[ServiceInfo] = &[
    ServiceInfo { name: "Alert Notification Service", id: "org.bluetooth.service.alert_notification", uuid: 0x1811 },
    ServiceInfo { name: "Battery Service", id: "org.bluetooth.service.battery_service", uuid: 0x180F },
    ServiceInfo { name: "Blood Pressure", id: "org.bluetooth.service.blood_pressure", uuid: 0x1810 },
    ServiceInfo { name: "Body Composition", id: "org.bluetooth.service.body_composition", uuid: 0x181B },
    ServiceInfo { name: "Bond Management", id: "org.bluetooth.service.bond_management", uuid: 0x181E },
    ServiceInfo { name: "Current Time Service", id: "org.bluetooth.service.current_time", uuid: 0x1805 },
    ServiceInfo { name: "Cycling Power", id: "org.bluetooth.service.cycling_power", uuid: 0x1818 },
    ServiceInfo { name: "Cycling Speed and Cadence", id: "org.bluetooth.service.cycling_speed_and_cadence", uuid: 0x1816 },
    ServiceInfo { name: "Device Information", id: "org.bluetooth.service.device_information", uuid: 0x180A },
    ServiceInfo { name: "Generic Access", id: "org.bluetooth.service.generic_access", uuid: 0x1800 },
    ServiceInfo { name: "Generic Attribute", id: "org.bluetooth.service.generic_attribute", uuid: 0x1801 },
    ServiceInfo { name: "Glucose", id: "org.bluetooth.service.glucose", uuid: 0x1808 },
    ServiceInfo { name: "Health Thermometer", id: "org.bluetooth.service.health_thermometer", uuid: 0x1809 },
    ServiceInfo { name: "Heart Rate", id: "org.bluetooth.service.heart_rate", uuid: 0x180D },
    ServiceInfo { name: "Human Interface Device", id: "org.bluetooth.service.human_interface_device", uuid: 0x1812 },
    ServiceInfo { name: "Immediate Alert", id: "org.bluetooth.service.immediate_alert", uuid: 0x1802 },
    ServiceInfo { name: "Link Loss", id: "org.bluetooth.service.link_loss", uuid: 0x1803 },
    ServiceInfo { name: "Location and Navigation", id: "org.bluetooth.service.location_and_navigation", uuid: 0x1819 },
    ServiceInfo { name: "Next DST Change Service", id: "org.bluetooth.service.next_dst_change", uuid: 0x1807 },
    ServiceInfo { name: "Phone Alert Status Service", id: "org.bluetooth.service.phone_alert_status", uuid: 0x180E },
    ServiceInfo { name: "Reference Time Update Service", id: "org.bluetooth.service.reference_time_update", uuid: 0x1806 },
    ServiceInfo { name: "Running Speed and Cadence", id: "org.bluetooth.service.running_speed_and_cadence", uuid: 0x1814 },
    ServiceInfo { name: "Scan Parameters", id: "org.bluetooth.service.scan_parameters", uuid: 0x1813 },
    ServiceInfo { name: "Tx Power", id: "org.bluetooth.service.tx_power", uuid: 0x1804 },
    ServiceInfo { name: "User Data", id: "org.bluetooth.service.user_data", uuid: 0x181C },
    ServiceInfo { name: "Weight Scale", id: "org.bluetooth.service.weight_scale", uuid: 0x181D },
];

/// Looks up an adopted primary service by UUID, including 128-bit UUIDs that
/// expand a SIG-assigned number.
pub fn lookup_service(uuid: &Uuid) -> Option<&'static ServiceInfo> {
    let uuid16 = uuid.as_u16()?;
    SERVICES.iter().find(|s| s.uuid == uuid16)
}
