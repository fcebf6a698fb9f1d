// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use pcie_harness_config::{HarnessConfig, PeerMode};

#[test]
fn test_minimal_yaml_uses_reference_defaults() {
    let yaml = r#"
name: "minimal"
"#;
    let config = HarnessConfig::from_yaml(yaml).unwrap();
    assert_eq!(config.schema_version, "1.0");
    assert_eq!(config.peripheral.base_address, 0x4000_0000);
    assert_eq!(config.window_size().unwrap(), 4096);
    assert_eq!(config.transfer.tx_length, 20);
    assert_eq!(config.peer.mode, PeerMode::Echo);
    assert_eq!(config.poll.timeout_ms, None);
}

#[test]
fn test_full_yaml_parses() {
    let yaml = r#"
schema_version: "1.0"
name: "overflow-bench"
peripheral:
  base_address: 0x80000000
  size: "1KB"
transfer:
  tx_channel: 3
  tx_length: 8
  rx_capacity: 16
poll:
  timeout_ms: 50
  max_polls: 1000
peer:
  mode: scripted
  latency_cycles: 4
  words: [7, 9]
  reported_length: 200
selftest:
  enabled: true
  file_name: "echo.txt"
  corrupt_at: 3
"#;
    let config = HarnessConfig::from_yaml(yaml).unwrap();
    assert_eq!(config.name, "overflow-bench");
    assert_eq!(config.peripheral.base_address, 0x8000_0000);
    assert_eq!(config.transfer.tx_channel, 3);
    assert_eq!(config.transfer.rx_capacity, 16);
    assert_eq!(config.poll.max_polls, Some(1000));
    assert_eq!(config.peer.mode, PeerMode::Scripted);
    assert_eq!(config.peer.words, vec![7, 9]);
    assert_eq!(config.peer.reported_length, Some(200));
    assert_eq!(config.selftest.corrupt_at, Some(3));
}

#[test]
fn test_unknown_field_rejected() {
    let yaml = r#"
transfer:
  tx_lenght: 20
"#;
    assert!(HarnessConfig::from_yaml(yaml).is_err());
}

#[test]
fn test_misaligned_base_rejected() {
    let yaml = r#"
peripheral:
  base_address: 0x40000004
"#;
    let err = HarnessConfig::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("aligned"));
}
