//! Port-based device-type heuristics.
//!
//! Rules are evaluated top to bottom and the first match wins, so the order of
//! [`RULES`] is significant: a host exposing both 9100 and 3389 is a node exporter.

use std::collections::BTreeSet;

use crate::types::DeviceType;

/// Condition a rule places on the open-port set.
#[derive(Debug, Clone, Copy)]
pub enum Condition {
    /// At least one of the ports is open.
    AnyOf(&'static [u16]),
    /// `open` is open while `closed` is not.
    OpenWithout { open: u16, closed: u16 },
}

impl Condition {
    fn matches(self, open_ports: &BTreeSet<u16>) -> bool {
        match self {
            Condition::AnyOf(ports) => ports.iter().any(|p| open_ports.contains(p)),
            Condition::OpenWithout { open, closed } => {
                open_ports.contains(&open) && !open_ports.contains(&closed)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub when: Condition,
    pub device_type: DeviceType,
}

pub const RULES: &[Rule] = &[
    Rule {
        when: Condition::AnyOf(&[9100]),
        device_type: DeviceType::NodeExporter,
    },
    Rule {
        when: Condition::AnyOf(&[3389]),
        device_type: DeviceType::WindowsPc,
    },
    Rule {
        when: Condition::OpenWithout { open: 22, closed: 80 },
        device_type: DeviceType::LinuxServer,
    },
    Rule {
        when: Condition::AnyOf(&[445]),
        device_type: DeviceType::WindowsSamba,
    },
    Rule {
        when: Condition::AnyOf(&[80, 443]),
        device_type: DeviceType::WebServer,
    },
    Rule {
        when: Condition::AnyOf(&[1883, 8883]),
        device_type: DeviceType::MqttBroker,
    },
];

/// Map an open-port set to a device type using [`RULES`].
pub fn classify(open_ports: &BTreeSet<u16>) -> DeviceType {
    RULES
        .iter()
        .find(|rule| rule.when.matches(open_ports))
        .map(|rule| rule.device_type)
        .unwrap_or(DeviceType::Unknown)
}
