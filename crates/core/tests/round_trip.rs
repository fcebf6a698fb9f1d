// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use pcie_harness_config::{HarnessConfig, PeerMode};
use pcie_harness_core::bus::SimBus;
use pcie_harness_core::mmio::MappedBar;
use pcie_harness_core::regs;
use pcie_harness_core::{
    CancelToken, Console, HarnessError, PollPolicy, RegisterAccess, TransferOrchestrator,
    TransferPlan, Word,
};
use std::path::PathBuf;
use std::time::Duration;

fn config_from(yaml: &str) -> anyhow::Result<HarnessConfig> {
    HarnessConfig::from_yaml(yaml)
}

fn write_bar_image(tag: &str, image: &[u8]) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push("pcie-harness-tests");
    let _ = std::fs::create_dir_all(&dir);
    let path = dir.join(format!("{}-{}.bin", tag, std::process::id()));
    std::fs::write(&path, image).unwrap();
    path
}

#[test]
fn test_echo_round_trip_for_several_lengths() -> anyhow::Result<()> {
    for len in [0u32, 1, 2, 3, 20, 64] {
        let config = config_from(&format!(
            "transfer:\n  tx_length: {}\npoll:\n  max_polls: 1000\n",
            len
        ))?;
        let bus = SimBus::from_config(&config)?;
        let (console, _sink) = Console::captured(false);
        let mut orch = TransferOrchestrator::bind(bus, config.peripheral.base_address, console)
            .with_poll_policy(PollPolicy::from(&config.poll));

        let plan = TransferPlan::from(&config.transfer);
        let mut buffer = vec![0 as Word; plan.rx_capacity];
        let report = orch.run(&plan, &mut buffer)?;

        let expected: Vec<(usize, Word)> = (0..len as usize)
            .step_by(2)
            .map(|i| (i, i as Word))
            .collect();
        assert_eq!(report.sent, expected, "sent pattern for length {}", len);
        assert_eq!(report.rx_length, len);
        assert_eq!(report.received, expected, "received for length {}", len);
    }
    Ok(())
}

#[test]
fn test_silent_peer_with_timeout() -> anyhow::Result<()> {
    let config = config_from("peer:\n  mode: silent\n")?;
    let bus = SimBus::from_config(&config)?;
    let base = config.peripheral.base_address;
    let mut orch = TransferOrchestrator::bind(bus, base, Console::captured(false).0)
        .with_poll_policy(PollPolicy::indefinite().with_timeout(Duration::from_millis(20)));

    let mut buffer = [0 as Word; 100];
    let err = orch.run(&TransferPlan::default(), &mut buffer).unwrap_err();
    match err {
        HarnessError::ReadyTimeout { polls, elapsed } => {
            assert!(polls > 0);
            assert!(elapsed >= Duration::from_millis(20));
        }
        other => panic!("expected timeout, got {other}"),
    }
    Ok(())
}

#[test]
fn test_pre_cancelled_wait_issues_no_status_read() -> anyhow::Result<()> {
    let mut config = HarnessConfig::default();
    config.peer.mode = PeerMode::Silent;
    let bus = SimBus::from_config(&config)?;

    let token = CancelToken::new();
    token.cancel();
    let base = config.peripheral.base_address;
    let mut orch = TransferOrchestrator::bind(bus, base, Console::captured(false).0)
        .with_poll_policy(PollPolicy::indefinite().with_cancel(token));

    let mut buffer = [0 as Word; 100];
    let err = orch.run(&TransferPlan::default(), &mut buffer).unwrap_err();
    assert!(matches!(err, HarnessError::Cancelled { polls: 0 }));
    Ok(())
}

#[test]
fn test_mapped_bar_with_static_device_image() -> anyhow::Result<()> {
    // A BAR whose receive side is already published: ready, 4 dwords, and a
    // data register that keeps returning the same word.
    let mut image = vec![0u8; regs::REGISTER_WINDOW as usize];
    image[regs::RXCHNL as usize..][..4].copy_from_slice(&1u32.to_le_bytes());
    image[regs::RXCHNL_LEN as usize..][..4].copy_from_slice(&4u32.to_le_bytes());
    image[regs::RXCHNL_DATA as usize..][..8].copy_from_slice(&0x55u64.to_le_bytes());
    let path = write_bar_image("static-image", &image);

    let bar = MappedBar::open(&path)?;
    let (console, sink) = Console::captured(false);
    let mut orch = TransferOrchestrator::bind(bar, 0, console)
        .with_poll_policy(PollPolicy::indefinite().with_max_polls(4));
    let plan = TransferPlan {
        tx_channel: 2,
        tx_length: 6,
        rx_capacity: 100,
    };
    let mut buffer = [0 as Word; 100];
    let report = orch.run(&plan, &mut buffer)?;

    assert_eq!(report.polls, 1);
    assert_eq!(report.received, vec![(0, 0x55), (2, 0x55)]);

    let (channel, _console) = orch.into_parts();
    let mut bar = channel.into_inner();
    assert_eq!(bar.read_u32(regs::TXCHNL)?, 2);
    assert_eq!(bar.read_u32(regs::TXCHNL_LEN)?, 6);
    // The data register holds the last word pushed.
    assert_eq!(bar.read_u64(regs::TXCHNL_DATA)?, 4);

    let text = String::from_utf8(sink.lock().unwrap().clone())?;
    assert!(text.contains("SUCCESS: got len! 4 \n"));

    drop(bar);
    let _ = std::fs::remove_file(path);
    Ok(())
}
