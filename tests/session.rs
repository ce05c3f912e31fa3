use std::time::Duration;

use dlogg::codec::{CMD_END_READ, CMD_FETCH_BLOCK, CMD_GET_HEADER};
use dlogg::sim::{sample_payload, Fault};
use dlogg::{
    DLogg, DeviceType, DriverError, InputValue, LoggingCriterion, Mode, SessionConfig, Shortfall,
    SimulatedLogger,
};

fn config() -> SessionConfig {
    SessionConfig::new("sim")
        .with_timeout(Duration::from_millis(50))
        .with_type_settle_delay(Duration::ZERO)
}

fn connect(sim: &SimulatedLogger) -> DLogg {
    DLogg::with_opener(config(), sim.opener()).expect("open simulated logger")
}

fn count_opcode(sim: &SimulatedLogger, opcode: u8) -> usize {
    sim.opcodes().iter().filter(|&&op| op == opcode).count()
}

// ============================================================================
// Identity and configuration
// ============================================================================

#[test]
fn session_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<DLogg>();
}

#[test]
fn identity_queries() {
    let sim = SimulatedLogger::new();
    let mut logger = connect(&sim);
    assert_eq!(logger.get_type().unwrap(), DeviceType::DLogg1Dl);
    assert_eq!(logger.get_mode().unwrap(), Mode::OneDl);
    let firmware = logger.get_firmware_version().unwrap();
    assert!(firmware.supports_logging_criterion());
    assert!(logger.identity().is_known());
}

#[test]
fn non_1dl_logger_is_rejected() {
    let sim = SimulatedLogger::new().with_mode(Mode::TwoDl);
    let err = DLogg::with_opener(config(), sim.opener()).err().unwrap();
    assert!(matches!(err, DriverError::Unsupported(_)));
}

#[test]
fn logging_criterion_round_trip() {
    let sim = SimulatedLogger::new();
    let mut logger = connect(&sim);
    let criterion = LoggingCriterion::interval(60).unwrap();
    logger.set_logging_criterion(criterion).unwrap();
    assert_eq!(sim.criterion_raw(), criterion.to_raw());
    assert_eq!(logger.get_logging_criterion().unwrap(), criterion);
}

#[test]
fn current_data_is_decoded() {
    let sim = SimulatedLogger::new();
    let mut logger = connect(&sim);
    let current = logger.get_current_data().unwrap();
    assert_eq!(
        current.measurements.inputs[0].value,
        InputValue::Temperature(23.5)
    );
    assert_eq!(current.measurements.inputs[1].value, InputValue::Digital(true));
    assert_eq!(current.measurements.inputs[2].value, InputValue::Unused);
}

// ============================================================================
// Ranged retrieval
// ============================================================================

#[test]
fn whole_log_across_ring_wrap() {
    let sim = SimulatedLogger::new().with_samples_at(8000, 300);
    let mut logger = connect(&sim);
    let header = logger.get_header().unwrap();
    assert_eq!(header.start_position(), 8000);
    assert_eq!(header.sample_count, 300);

    let samples = logger
        .fetch_data_range(header.start_position(), header.sample_count as usize)
        .unwrap();
    logger.fetch_end().unwrap();

    assert_eq!(samples.len(), 300);
    assert!(samples.windows(2).all(|w| w[0].position < w[1].position));
    for sample in &samples {
        assert_eq!(sample.raw, sample_payload(sample.position));
    }
    assert_eq!(samples[192].address.index(), 0);
    assert!(!sim.transfer_open());
}

#[test]
fn first_sample_and_overlong_range() {
    let sim = SimulatedLogger::new().with_samples(10);
    let mut logger = connect(&sim);
    let header = logger.get_header().unwrap();
    assert_eq!((header.start_position(), header.sample_count), (0, 10));

    let samples = logger.fetch_data_range(0, 1).unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].position, 0);
    logger.fetch_end().unwrap();

    let fetches = count_opcode(&sim, CMD_FETCH_BLOCK);
    let err = logger.fetch_data_range(9, 2).unwrap_err();
    assert!(matches!(
        err,
        DriverError::IncompleteRange {
            start: 9,
            requested: 2,
            received: 0,
            shortfall: Shortfall::BeyondLog { available: 1 },
        }
    ));
    assert_eq!(count_opcode(&sim, CMD_FETCH_BLOCK), fetches);
    assert!(!logger.transfer_open());
    assert!(logger.is_open());
}

#[test]
fn fetch_all_closes_transfer() {
    let sim = SimulatedLogger::new().with_samples(12);
    let mut logger = connect(&sim);
    let samples = logger.fetch_all_data().unwrap();
    assert_eq!(samples.len(), 12);
    assert_eq!(count_opcode(&sim, CMD_GET_HEADER), 1);
    assert_eq!(count_opcode(&sim, CMD_FETCH_BLOCK), 12);
    assert_eq!(sim.opcodes().last(), Some(&CMD_END_READ));
    assert!(!logger.transfer_open());
    assert!(!sim.transfer_open());
}

#[test]
fn end_of_data_marker_ends_fetch() {
    let sim = SimulatedLogger::new().with_samples(10);
    sim.erase_from(6);
    let mut logger = connect(&sim);
    let err = logger.fetch_all_data().unwrap_err();
    assert!(matches!(
        err,
        DriverError::IncompleteRange {
            requested: 10,
            received: 6,
            shortfall: Shortfall::EndOfData,
            ..
        }
    ));
    // The marker is a valid reply, so the session stays usable.
    assert!(logger.is_open());
    assert!(!sim.transfer_open());
}

#[test]
fn clear_memory_empties_log() {
    let sim = SimulatedLogger::new().with_samples(5);
    let mut logger = connect(&sim);
    logger.clear_memory().unwrap();
    assert!(logger.cached_header().is_none());
    let header = logger.get_header().unwrap();
    assert!(header.is_empty());
    assert!(logger.fetch_all_data().unwrap().is_empty());
    assert_eq!(count_opcode(&sim, CMD_FETCH_BLOCK), 0);
}

#[test]
fn transfer_blocks_other_commands() {
    let sim = SimulatedLogger::new().with_samples(4);
    let mut logger = connect(&sim);
    logger.fetch_data_range(0, 2).unwrap();
    assert!(matches!(
        logger.get_header(),
        Err(DriverError::TransferInProgress { opcode: 0xAA })
    ));
    assert!(matches!(
        logger.clear_memory(),
        Err(DriverError::TransferInProgress { .. })
    ));
    assert_eq!(sim.stored_samples(), 4);
    logger.fetch_end().unwrap();
    logger.get_header().unwrap();
}

#[test]
fn drop_releases_transfer() {
    let sim = SimulatedLogger::new().with_samples(4);
    {
        let mut logger = connect(&sim);
        logger.fetch_data_range(0, 1).unwrap();
        assert!(sim.transfer_open());
    }
    assert!(!sim.transfer_open());
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn timeout_closes_until_reopen() {
    let sim = SimulatedLogger::new().with_samples(3);
    let mut logger = connect(&sim);
    sim.stall_next_reply();
    assert!(matches!(
        logger.get_header(),
        Err(DriverError::Timeout { expected: 13, .. })
    ));
    assert!(!logger.is_open());
    assert!(matches!(logger.get_header(), Err(DriverError::NotConnected)));
    assert!(matches!(
        logger.get_current_data(),
        Err(DriverError::NotConnected)
    ));
    assert!(matches!(logger.get_type(), Err(DriverError::NotConnected)));

    logger.reopen().unwrap();
    assert_eq!(sim.opens(), 2);
    assert_eq!(logger.get_header().unwrap().sample_count, 3);
}

fn assert_every_operation_not_connected(logger: &mut DLogg) {
    fn not_connected<T>(result: Result<T, DriverError>) -> bool {
        matches!(result, Err(DriverError::NotConnected))
    }
    assert!(!logger.is_open());
    assert!(not_connected(logger.get_type()));
    assert!(not_connected(logger.get_firmware_version()));
    assert!(not_connected(logger.get_mode()));
    assert!(not_connected(logger.get_logging_criterion()));
    let criterion = LoggingCriterion::interval(60).unwrap();
    assert!(not_connected(logger.set_logging_criterion(criterion)));
    assert!(not_connected(logger.get_current_data()));
    assert!(not_connected(logger.get_header()));
    assert!(not_connected(logger.fetch_data_range(0, 0)));
    assert!(not_connected(logger.fetch_data_range(0, 1)));
    assert!(not_connected(logger.fetch_data_range(9, 2)));
    assert!(not_connected(logger.fetch_sample(0)));
    assert!(not_connected(logger.fetch_end()));
    assert!(not_connected(logger.fetch_all_data()));
    assert!(not_connected(logger.clear_memory()));
    assert!(logger.cached_header().is_none());
}

#[test]
fn every_operation_fails_after_timeout() {
    let sim = SimulatedLogger::new().with_samples(10);
    let mut logger = connect(&sim);
    logger.get_type().unwrap();
    logger.get_firmware_version().unwrap();
    logger.get_header().unwrap();
    sim.stall_next_reply();
    assert!(matches!(
        logger.get_current_data(),
        Err(DriverError::Timeout { .. })
    ));
    let sent = sim.requests().len();
    assert_every_operation_not_connected(&mut logger);
    assert_eq!(sim.requests().len(), sent);
}

#[test]
fn every_operation_fails_after_close() {
    let sim = SimulatedLogger::new().with_samples(10);
    let mut logger = connect(&sim);
    logger.get_type().unwrap();
    logger.get_firmware_version().unwrap();
    logger.get_header().unwrap();
    logger.close();
    let sent = sim.requests().len();
    assert_every_operation_not_connected(&mut logger);
    assert_eq!(sim.requests().len(), sent);

    // A fresh header is queried after reopening.
    logger.reopen().unwrap();
    assert!(logger.cached_header().is_none());
    assert_eq!(logger.fetch_data_range(9, 1).unwrap().len(), 1);
    assert_eq!(count_opcode(&sim, CMD_GET_HEADER), 2);
}

#[test]
fn corrupt_reply_closes_connection() {
    let sim = SimulatedLogger::new().with_samples(3);
    let mut logger = connect(&sim);
    sim.inject(Fault::FlipBit { byte: 3, bit: 0 });
    assert!(matches!(
        logger.get_header(),
        Err(DriverError::FrameCorrupt { opcode: 0xAA, .. })
    ));
    assert!(matches!(logger.get_header(), Err(DriverError::NotConnected)));
}

#[test]
fn short_sample_reply_is_a_timeout() {
    let sim = SimulatedLogger::new().with_samples(3);
    let mut logger = connect(&sim);
    logger.get_header().unwrap();
    sim.inject(Fault::Truncate(10));
    match logger.fetch_data_range(0, 2).unwrap_err() {
        DriverError::Timeout { expected, received } => {
            assert_eq!(expected, 65);
            assert_eq!(received.len(), 10);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(sim.transfer_open());

    logger.reopen().unwrap();
    assert!(!sim.transfer_open());
    let samples = logger.fetch_all_data().unwrap();
    assert_eq!(samples.len(), 3);
}

#[test]
fn wrong_echo_is_a_protocol_mismatch() {
    let sim = SimulatedLogger::new().with_samples(3);
    let mut logger = connect(&sim);
    sim.inject(Fault::Replace(vec![0x00]));
    assert!(matches!(
        logger.clear_memory(),
        Err(DriverError::ProtocolMismatch { opcode: 0xAF, .. })
    ));
    assert!(!logger.is_open());
}

#[test]
fn decode_error_leaves_session_open() {
    let sim = SimulatedLogger::new();
    sim.set_input_word(5, 0x5000);
    let mut logger = connect(&sim);
    match logger.get_current_data().unwrap_err() {
        DriverError::Decode(e) => assert_eq!(e.offset(), 11),
        other => panic!("unexpected error: {other}"),
    }
    assert!(logger.is_open());
}
