//! Integration tests for the driver core
//!
//! Everything runs against the loopback mock link, which lets the tests
//! drive interrupt completions, inject transport failures and yank the
//! cable at awkward moments.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use driver::{AccessMode, DriverError, attach, format_switches};
use proptest::prelude::*;
use transport::{MockLink, TransferStatus, TransportError};

fn full_board() -> Arc<MockLink> {
    Arc::new(MockLink::loopback())
}

mod interrupt_monitor {
    use super::*;

    #[test]
    fn test_cache_tracks_latest_completion() {
        let link = full_board();
        let device = attach(link.clone()).unwrap();

        for byte in [0x01u8, 0x80, 0x55, 0xaa] {
            assert!(link.push_switches(byte));
            assert_eq!(device.switches(), byte);
        }
        // no accumulation: only the most recent value is visible
        assert_eq!(device.switches(), 0xaa);
    }

    #[test]
    fn test_switch_string_rendering() {
        let link = full_board();
        let device = attach(link.clone()).unwrap();

        link.push_switches(0b1011_0000);
        assert_eq!(device.switch_string(), "10110000");
    }

    #[test]
    fn test_completion_wakes_waiter() {
        let link = full_board();
        let device = Arc::new(attach(link.clone()).unwrap());

        let waiter = {
            let device = Arc::clone(&device);
            thread::spawn(move || device.wait_switch_change(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(50));
        link.push_switches(0x0f);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_error_completion_parks_channel() {
        let link = full_board();
        let device = attach(link.clone()).unwrap();

        link.push_switches(0x3c);
        assert!(link.fail_interrupt(TransferStatus::Stall));

        // parked: the stale value persists and no further completions land
        assert!(!link.interrupt_armed());
        assert!(!link.push_switches(0xff));
        assert_eq!(device.switches(), 0x3c);
    }

    #[test]
    fn test_rearm_failure_stalls_without_teardown() {
        let link = full_board();
        let device = attach(link.clone()).unwrap();

        link.unplug();
        // the in-flight completion still delivers, then the rearm fails
        // and the monitor parks instead of crashing the context
        assert!(link.push_switches(0x42));
        assert_eq!(device.switches(), 0x42);
        assert!(!link.interrupt_armed());
        assert!(device.is_connected());
    }
}

mod access_gate {
    use super::*;

    #[test]
    fn test_second_writer_gets_busy() {
        let link = full_board();
        let device = attach(link.clone()).unwrap();

        let first = device.open(AccessMode::Write).unwrap();
        assert_eq!(device.open(AccessMode::Write).unwrap_err(), DriverError::Busy);

        drop(first);
        device.open(AccessMode::Write).unwrap();
    }

    #[test]
    fn test_read_write_rolls_back_on_conflict() {
        let link = full_board();
        let device = attach(link.clone()).unwrap();

        let writer = device.open(AccessMode::Write).unwrap();
        assert_eq!(
            device.open(AccessMode::ReadWrite).unwrap_err(),
            DriverError::Busy
        );
        // the failed combined claim must not have leaked a read claim
        let reader = device.open(AccessMode::Read).unwrap();
        drop(reader);
        drop(writer);
    }

    #[test]
    fn test_release_frees_only_own_claims() {
        let link = full_board();
        let device = attach(link.clone()).unwrap();

        let reader = device.open(AccessMode::Read).unwrap();
        let writer = device.open(AccessMode::Write).unwrap();

        drop(reader);
        assert_eq!(device.open(AccessMode::Write).unwrap_err(), DriverError::Busy);
        device.open(AccessMode::Read).unwrap();
        drop(writer);
    }

    #[test]
    fn test_open_resets_claimed_endpoints() {
        let link = full_board();
        let device = attach(link.clone()).unwrap();

        let handle = device.open(AccessMode::ReadWrite).unwrap();
        let calls = link.clear_halt_calls();
        assert!(calls.contains(&transport::mock::BULK_IN));
        assert!(calls.contains(&transport::mock::BULK_OUT));
        drop(handle);
    }

    #[test]
    fn test_reset_failure_does_not_block_open() {
        let link = full_board();
        link.fail_clear_halt(transport::mock::BULK_IN, TransportError::Io);
        let device = attach(link.clone()).unwrap();

        device.open(AccessMode::Read).unwrap();
    }

    #[test]
    fn test_handle_enforces_its_access_mode() {
        let link = full_board();
        let device = attach(link.clone()).unwrap();

        let reader = device.open(AccessMode::Read).unwrap();
        assert_eq!(reader.write(&[1]).unwrap_err(), DriverError::InvalidAccess);

        let writer = device.open(AccessMode::Write).unwrap();
        assert_eq!(writer.read(8).unwrap_err(), DriverError::InvalidAccess);
    }
}

mod bulk_channel {
    use super::*;

    #[test]
    fn test_loopback_round_trip() {
        let link = full_board();
        let device = attach(link.clone()).unwrap();
        let handle = device.open(AccessMode::ReadWrite).unwrap();

        assert_eq!(handle.write(&[0x01, 0x02, 0x03]).unwrap(), 3);
        assert_eq!(device.pending_data(), 3);

        let echoed = handle.read(64).unwrap();
        assert_eq!(echoed, vec![0x01, 0x02, 0x03]);
        assert_eq!(device.pending_data(), 0);
    }

    #[test]
    fn test_empty_write_is_a_noop() {
        let link = full_board();
        let device = attach(link.clone()).unwrap();
        let handle = device.open(AccessMode::Write).unwrap();

        assert_eq!(handle.write(&[]).unwrap(), 0);
        assert_eq!(device.pending_data(), 0);
        assert_eq!(link.writes_submitted(), 0);
    }

    #[test]
    fn test_read_is_capped_by_negotiated_size() {
        let link = full_board();
        let device = attach(link.clone()).unwrap();
        let handle = device.open(AccessMode::ReadWrite).unwrap();

        let payload: Vec<u8> = (0..100).collect();
        handle.write(&payload).unwrap();

        // negotiated bulk-in size is 64, so a greedy read stops there
        let first = handle.read(1000).unwrap();
        assert_eq!(first.len(), 64);
        let rest = handle.read(1000).unwrap();
        assert_eq!(rest.len(), 36);
        assert_eq!(device.pending_data(), 0);
    }

    #[test]
    fn test_failed_submission_leaves_pending_untouched() {
        let link = full_board();
        let device = attach(link.clone()).unwrap();
        let handle = device.open(AccessMode::Write).unwrap();

        link.fail_next_bulk_out(TransportError::Io);
        assert_eq!(
            handle.write(&[1, 2, 3]).unwrap_err(),
            DriverError::Submission(TransportError::Io)
        );
        assert_eq!(device.pending_data(), 0);
    }

    #[test]
    fn test_unexpected_completion_status_is_tolerated() {
        let link = full_board();
        let device = attach(link.clone()).unwrap();
        let handle = device.open(AccessMode::Write).unwrap();

        // completion reports an error after submission succeeded: the
        // caller already got its byte count and pending stays accounted
        link.set_write_completion_status(TransferStatus::Error);
        assert_eq!(handle.write(&[9, 9]).unwrap(), 2);
        assert_eq!(device.pending_data(), 2);
        assert_eq!(link.loopback_len(), 0);
    }

    #[test]
    fn test_pending_never_underflows() {
        let link = full_board();
        let device = attach(link.clone()).unwrap();
        let handle = device.open(AccessMode::ReadWrite).unwrap();

        // data the board produced on its own was never accounted as
        // pending; consuming it must saturate at zero, not wrap
        link.seed_loopback(&[1, 2, 3]);
        assert_eq!(handle.read(64).unwrap(), vec![1, 2, 3]);
        assert_eq!(device.pending_data(), 0);

        assert_eq!(handle.write(&[4, 5]).unwrap(), 2);
        assert_eq!(device.pending_data(), 2);
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn test_attach_requires_expected_endpoints() {
        let link = Arc::new(MockLink::with_endpoints(vec![]));
        assert_eq!(attach(link).unwrap_err(), DriverError::NoSuchDevice);
    }

    #[test]
    fn test_attach_unwinds_on_submit_failure() {
        let link = full_board();
        link.fail_next_interrupt_submit();

        assert_eq!(
            attach(link.clone()).unwrap_err(),
            DriverError::Submission(TransportError::Io)
        );
        // the partially built context is gone: its link clone is dropped
        // and the registered request was killed on the way out
        assert_eq!(Arc::strong_count(&link), 1);
        assert!(link.interrupt_killed());
    }

    #[test]
    fn test_open_after_disconnect_is_refused() {
        let link = full_board();
        let device = attach(link.clone()).unwrap();

        device.disconnect();
        assert!(!device.is_connected());
        assert_eq!(
            device.open(AccessMode::Read).unwrap_err(),
            DriverError::NoSuchDevice
        );
    }

    #[test]
    fn test_context_survives_disconnect_until_last_handle() {
        let link = full_board();
        let device = attach(link.clone()).unwrap();
        // test + context
        assert_eq!(Arc::strong_count(&link), 2);

        let handle = device.open(AccessMode::ReadWrite).unwrap();
        device.disconnect();

        // the interrupt request was cancelled synchronously, but the
        // context — and with it the link — lives on for the handle
        assert!(link.interrupt_killed());
        assert_eq!(Arc::strong_count(&link), 2);

        // post-disconnect I/O fails cleanly instead of crashing
        assert_eq!(handle.read(8).unwrap_err(), DriverError::NoSuchDevice);
        assert_eq!(handle.write(&[1]).unwrap_err(), DriverError::NoSuchDevice);

        // dropping the attach-time reference still leaves the handle's
        drop(device);
        assert_eq!(Arc::strong_count(&link), 2);

        // last reference out: teardown releases the link
        drop(handle);
        assert_eq!(Arc::strong_count(&link), 1);
    }

    #[test]
    fn test_disconnect_wakes_blocked_reader() {
        let link = full_board();
        let device = attach(link.clone()).unwrap();
        let handle = device.open(AccessMode::Read).unwrap();

        let reader = thread::spawn(move || handle.read(64));
        thread::sleep(Duration::from_millis(50));

        link.unplug();
        device.disconnect();

        let outcome = reader.join().expect("reader must not crash");
        assert!(matches!(
            outcome,
            Err(DriverError::NoSuchDevice) | Err(DriverError::Timeout)
        ));
    }

    #[test]
    fn test_dropping_device_behaves_like_disconnect() {
        let link = full_board();
        let device = attach(link.clone()).unwrap();
        drop(device);

        assert!(link.interrupt_killed());
        assert_eq!(Arc::strong_count(&link), 1);
    }
}

mod switch_only_profile {
    use super::*;

    #[test]
    fn test_read_yields_rendered_bank() {
        let link = Arc::new(MockLink::switch_only());
        let device = attach(link.clone()).unwrap();
        let handle = device.open(AccessMode::Read).unwrap();

        link.push_switches(0b1010_0101);
        assert_eq!(handle.read(64).unwrap(), b"10100101".to_vec());
        // a short read truncates the rendering
        assert_eq!(handle.read(4).unwrap(), b"1010".to_vec());
    }

    #[test]
    fn test_write_is_refused() {
        let link = Arc::new(MockLink::switch_only());
        let device = attach(link.clone()).unwrap();
        let handle = device.open(AccessMode::ReadWrite).unwrap();

        assert_eq!(handle.write(&[1]).unwrap_err(), DriverError::NoSuchDevice);
    }
}

proptest! {
    #[test]
    fn prop_switch_string_matches_bits(byte: u8) {
        let rendered = format_switches(byte);
        prop_assert_eq!(rendered.len(), 8);
        for (i, c) in rendered.chars().enumerate() {
            let bit = byte & (0x80 >> i) != 0;
            prop_assert_eq!(c, if bit { '1' } else { '0' });
        }
    }
}
