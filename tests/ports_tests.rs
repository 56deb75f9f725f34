use lan_device_exporter::ports::{parse_ports_str, port_chunks, COMMON_PORTS, METRICS_PORTS};

#[test]
fn ports_file_accepts_ranges_comments_and_commas() {
    let input = r#"
        # exporters
        9100, 9090
        1883  # mqtt
        5900-5902
        5901  # already covered

    "#;

    let ports: Vec<u16> = parse_ports_str(input).expect("parse ok").into_iter().collect();
    assert_eq!(ports, vec![1883, 5900, 5901, 5902, 9090, 9100]);
}

#[test]
fn port_zero_is_rejected() {
    assert!(parse_ports_str("0\n").is_err());
    assert!(parse_ports_str("10-5").is_err());
}

#[test]
fn metrics_ports_are_fixed() {
    assert_eq!(METRICS_PORTS, &[9100, 8080, 80, 3000, 9090]);
    assert!(COMMON_PORTS.contains(&9100));
}

#[test]
fn chunks_are_contiguous() {
    let chunks = port_chunks(1, 2500, 1000);
    assert_eq!(chunks, vec![1..=1000, 1001..=2000, 2001..=2500]);
}
