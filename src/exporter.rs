//! Prometheus text exposition of the device inventory.

use std::fmt::Write;

use crate::types::DeviceRecord;

/// Render `network_device_up` and `network_device_metrics_available` gauges.
pub fn render(devices: &[DeviceRecord]) -> String {
    let mut out = String::new();

    out.push_str("# HELP network_device_up Network device status\n");
    out.push_str("# TYPE network_device_up gauge\n");
    for d in devices {
        let _ = writeln!(
            out,
            "network_device_up{{ip=\"{}\",mac=\"{}\",vendor=\"{}\"}} 1",
            escape(&d.ip),
            escape(&d.mac),
            escape(&d.vendor)
        );
    }

    out.push_str("# HELP network_device_metrics_available Device exposes Prometheus metrics\n");
    out.push_str("# TYPE network_device_metrics_available gauge\n");
    for d in devices {
        for url in &d.metrics_urls {
            let _ = writeln!(
                out,
                "network_device_metrics_available{{ip=\"{}\",url=\"{}\"}} 1",
                escape(&d.ip),
                escape(url)
            );
        }
    }

    out
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
