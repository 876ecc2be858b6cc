use super::*;
use crate::transport::mock::ScriptedPort;
use std::path::PathBuf;

fn frame(current: i16, voltage: i16) -> Vec<u8> {
    let mut bytes = current.to_le_bytes().to_vec();
    bytes.extend_from_slice(&voltage.to_le_bytes());
    bytes
}

fn scripted_adc(flags: ControlFlags) -> (Arc<Adc>, crate::transport::mock::PortLog) {
    let (port, log) = ScriptedPort::silent(b'\r');
    let adc = Adc::with_transport(AdcConfig::default(), flags, Some(Box::new(port)));
    (Arc::new(adc), log)
}

#[test]
fn test_configure_writes_command_sequence() {
    let (adc, log) = scripted_adc(ControlFlags::default());
    adc.configure(2, 5_000.0, 5, 1, 2).unwrap();
    assert_eq!(
        log.written(),
        "stop\rencode 0\rslist 0 0\rslist 1 1\rsrate 12000\rdec 5\rdeca 1\rps 2\r"
    );
    let acq = adc.acquisition();
    assert_eq!(acq.rate(), 2_000.0);
    assert_eq!(acq.packet_bytes(), 64);
}

#[test]
fn test_configure_rejects_bad_values() {
    let (adc, log) = scripted_adc(ControlFlags::default());
    assert!(matches!(
        adc.configure(3, 5_000.0, 1, 1, 1),
        Err(AdcError::InvalidParameters(_))
    ));
    assert!(adc.configure(2, 5_000.0, 1, 1, 0).is_err());
    assert!(adc.configure(2, 5_000.0, 1, 7, 1).is_err());
    assert!(adc.configure(2, 5_000.0, 0, 1, 1).is_err());
    assert_eq!(log.written(), "");
}

#[test]
fn test_solve_decimation_prefers_primary() {
    let d = solve_decimation(2, 5_000.0, 512, 1_000.0).unwrap();
    assert_eq!((d.dec, d.deca), (10, 1));
    assert_eq!(d.rate, 1_000.0);

    let d = solve_decimation(2, 5_000.0, 512, 10.0).unwrap();
    assert_eq!((d.dec, d.deca), (100, 10));

    let d = solve_decimation(2, 5_000.0, 512, 0.1).unwrap();
    assert_eq!((d.dec, d.deca), (100, 1000));

    assert!(solve_decimation(2, 5_000.0, 512, 20_000.0).is_none());
    assert!(solve_decimation(2, 5_000.0, 512, 0.0).is_none());
}

#[test]
fn test_set_sample_rate_programs_device() {
    let (adc, log) = scripted_adc(ControlFlags::default());
    let rate = adc.set_sample_rate(1_000.0).unwrap();
    assert_eq!(rate, 1_000.0);
    assert!(log.written().contains("dec 10\rdeca 1\r"));
    assert!(adc.set_sample_rate(1e6).is_err());
}

#[test]
fn test_decoder_keeps_partial_frames() {
    let mut decoder = FrameDecoder::new(2);
    let bytes = [frame(16384, -32768), frame(-16384, 0)].concat();

    let first = decoder.decode(&bytes[..3]);
    assert!(first.is_empty());
    assert_eq!(decoder.pending(), 3);

    let rest = decoder.decode(&bytes[3..]);
    assert_eq!(rest.current, vec![5.0, -5.0]);
    assert_eq!(rest.voltage, vec![-10.0, 0.0]);
    assert_eq!(decoder.pending(), 0);
}

#[test]
fn test_single_channel_records_zero_voltage() {
    let mut decoder = FrameDecoder::new(1);
    let block = decoder.decode(&[0x00, 0x40, 0x00, 0xC0, 0x01]);
    assert_eq!(block.current, vec![5.0, -5.0]);
    assert_eq!(block.voltage, vec![0.0, 0.0]);
    assert_eq!(decoder.pending(), 1);
}

#[test]
fn test_interpolate_times() {
    let times = interpolate_times(1.0, 2.0, 4);
    assert_eq!(times, vec![1.25, 1.5, 1.75, 2.0]);
    assert!(interpolate_times(1.0, 2.0, 0).is_empty());
}

#[test]
fn test_poll_captures_scaled_samples() {
    let (adc, log) = scripted_adc(ControlFlags::default());
    let frames: Vec<u8> = (0..10).flat_map(|k| frame(1638 * k, 3277)).collect();
    log.feed(&frames);

    let n = adc.poll(Duration::from_millis(40), Some(1e-6)).unwrap();
    assert_eq!(n, 10);
    assert!(!adc.is_polling());
    assert!(log.written().starts_with("start\r"));
    assert!(log.written().ends_with("stop\r"));

    let buffer = adc.snapshot().unwrap();
    assert_eq!(buffer.len(), 10);
    assert_eq!(buffer.gain, 1e-6);
    assert!((buffer.v[0] - 1.0).abs() < 1e-3);
    let last = adc.last_currents(1)[0];
    assert!((last - 1638.0 * 9.0 * VOLTS_PER_COUNT * 1e-6).abs() < 1e-15);
    for pair in buffer.t.windows(2) {
        assert!(pair[1] >= pair[0]);
    }
}

#[test]
fn test_stop_polling_ends_poll() {
    let (adc, _log) = scripted_adc(ControlFlags::default());
    let started = Instant::now();
    let handle = adc.spawn_poll(Duration::from_secs(10), None).unwrap();
    thread::sleep(Duration::from_millis(30));
    assert!(adc.is_polling());
    adc.stop_polling();
    handle.join().unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_second_poll_takes_over() {
    let (adc, log) = scripted_adc(ControlFlags::default());
    let started = Instant::now();
    let first = adc.spawn_poll(Duration::from_secs(10), None).unwrap();
    thread::sleep(Duration::from_millis(30));

    log.feed(&frame(100, 100));
    adc.poll(Duration::from_millis(30), None).unwrap();
    first.join().unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_abort_ends_poll() {
    let flags = ControlFlags::default();
    let (adc, _log) = scripted_adc(flags.clone());
    flags.raise_abort();
    let started = Instant::now();
    assert_eq!(adc.poll(Duration::from_secs(10), None).unwrap(), 0);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_missing_port_in_test_mode_idles() {
    let config = AdcConfig {
        serial: crate::transport::SerialSettings {
            path: PathBuf::from("/nonexistent/ttyADC"),
            ..Default::default()
        },
        ..Default::default()
    };
    let err = Adc::open(config.clone(), ControlFlags::new(false)).err().unwrap();
    assert_eq!(err.kind(), crate::error::ErrorKind::DeviceUnavailable);

    let adc = Adc::open(config, ControlFlags::new(true)).unwrap();
    assert!(!adc.is_connected());
    assert_eq!(adc.poll(Duration::from_millis(20), None).unwrap(), 0);
}

#[test]
fn test_force_data_replaces_capture() {
    let (adc, _log) = scripted_adc(ControlFlags::default());
    let cv = crate::experiment::Voltammogram::new(
        Default::default(),
        vec![0.0, 1.0],
        vec![0.0, 0.1],
        vec![1e-9, 2e-9],
    )
    .unwrap();
    adc.force_data(cv.into());
    assert!(adc.snapshot().is_none());
    assert_eq!(adc.data().kind_name(), "Voltammogram");
    assert!(adc.last_currents(5).is_empty());
}
