// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

#[cfg(test)]
mod integration_tests {
    use crate::bus::SimBus;
    use crate::peripherals::pcie::{PcieChannel, PeerBehavior};
    use crate::selftest::{self, FileCompare, LoopbackConsole};
    use crate::{
        ChannelState, Console, HarnessError, PollPolicy, TransferOrchestrator, TransferPlan, Word,
    };
    use pcie_harness_config::HarnessConfig;

    const BASE: u64 = 0x4000_0000;

    #[test]
    fn test_round_trip_from_default_config() {
        let config = HarnessConfig::default();
        let bus = SimBus::from_config(&config).unwrap();
        let (console, sink) = Console::captured(false);
        let mut orch = TransferOrchestrator::bind(bus, config.peripheral.base_address, console)
            .with_poll_policy(PollPolicy::from(&config.poll));

        let plan = TransferPlan::from(&config.transfer);
        let mut buffer = vec![0 as Word; plan.rx_capacity];
        let report = orch.run(&plan, &mut buffer).unwrap();

        assert_eq!(report.rx_length, 20);
        assert_eq!(report.received.len(), 10);
        assert_eq!(orch.channel().state(), ChannelState::RxDone);

        let (channel, _console) = orch.into_parts();
        let bus = channel.into_inner();
        let pcie = bus.pcie().unwrap();
        assert_eq!(pcie.transmitted().len(), 1);
        assert_eq!(pcie.transmitted()[0].channel, 1);
        assert_eq!(pcie.transmitted()[0].words, (0..20).step_by(2).collect::<Vec<Word>>());
        assert_eq!(pcie.rx_remaining(), 0);
        assert!(!pcie.is_rx_ready());
        assert_eq!(pcie.rx_underflows(), 0);

        let text = String::from_utf8(sink.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 10 + 2 + 10);
        assert_eq!(lines[10], "SUCCESS: got rx!");
        assert_eq!(lines[11], "SUCCESS: got len! 20 ");
    }

    #[test]
    fn test_independent_blocks_on_one_bus() {
        let mut bus = SimBus::new();
        bus.attach(
            "pcie0",
            BASE,
            0x20,
            Box::new(PcieChannel::new(PeerBehavior::Echo).with_latency(4)),
        );
        bus.attach(
            "pcie1",
            BASE + 0x1000,
            0x20,
            Box::new(PcieChannel::new(PeerBehavior::Scripted {
                words: vec![7, 8],
                reported_len: None,
            })),
        );

        let mut buffer = [0 as Word; 100];
        {
            let mut orch = TransferOrchestrator::bind(&mut bus, BASE, Console::captured(false).0);
            let report = orch.run(&TransferPlan::default(), &mut buffer).unwrap();
            assert_eq!(report.rx_length, 20);
        }
        {
            let plan = TransferPlan {
                tx_channel: 3,
                tx_length: 4,
                ..TransferPlan::default()
            };
            let mut orch =
                TransferOrchestrator::bind(&mut bus, BASE + 0x1000, Console::captured(false).0);
            let report = orch.run(&plan, &mut buffer).unwrap();
            assert_eq!(report.rx_length, 4);
            assert_eq!(report.received, vec![(0, 7), (2, 8)]);
        }

        let first = bus.peripheral::<PcieChannel>("pcie0").unwrap();
        let second = bus.peripheral::<PcieChannel>("pcie1").unwrap();
        assert_eq!(first.transmitted().len(), 1);
        assert_eq!(first.transmitted()[0].channel, 1);
        assert_eq!(second.transmitted().len(), 1);
        assert_eq!(second.transmitted()[0].channel, 3);
        assert_eq!(second.transmitted()[0].words, vec![0, 2]);
    }

    #[test]
    fn test_lying_peer_caught_before_buffer_write() {
        let mut config = HarnessConfig::default();
        config.peer.mode = pcie_harness_config::PeerMode::Scripted;
        config.peer.words = vec![1, 2, 3];
        config.peer.reported_length = Some(101);

        let bus = SimBus::from_config(&config).unwrap();
        let mut orch = TransferOrchestrator::bind(bus, BASE, Console::captured(false).0);
        let mut buffer = vec![0 as Word; config.transfer.rx_capacity];
        let err = orch
            .run(&TransferPlan::from(&config.transfer), &mut buffer)
            .unwrap_err();

        assert!(matches!(
            err,
            HarnessError::CapacityExceeded {
                reported: 101,
                capacity: 100
            }
        ));
        assert_eq!(orch.channel().state(), ChannelState::RxDraining);
        assert_eq!(orch.channel().popped(), 0);
    }

    #[test]
    fn test_round_trip_then_file_self_test_share_console() {
        let bus = SimBus::with_pcie(BASE, 0x20, PcieChannel::default());
        let (console, sink) = Console::captured(false);
        let mut orch = TransferOrchestrator::bind(bus, BASE, console);
        let mut buffer = [0 as Word; 100];
        orch.run(&TransferPlan::default(), &mut buffer).unwrap();

        let mut host = LoopbackConsole::new();
        let outcome = selftest::file_self_test(
            &mut host,
            orch.console_mut(),
            selftest::DEFAULT_FILE_NAME,
            selftest::SELFTEST_TEXT,
        )
        .unwrap();
        assert!(matches!(outcome, FileCompare::Match { .. }));

        let text = String::from_utf8(sink.lock().unwrap().clone()).unwrap();
        assert!(text.ends_with("data[18]! 18 \nSUCCESS: Send and received file match!\n"));
    }
}
