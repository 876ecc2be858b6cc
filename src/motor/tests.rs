use super::*;
use crate::transport::mock::ScriptedPort;

fn scripted_motor() -> (CoarseMotor, crate::transport::mock::PortLog) {
    let (port, log) = ScriptedPort::new(b'\r', |cmd| match cmd {
        "VE?" => Some("8742 Version 2.2 08/01/13\r\n".to_string()),
        _ => None,
    });
    let motor = CoarseMotor::with_transport(MotorConfig::default(), "test", Some(Box::new(port)));
    (motor, log)
}

#[test]
fn test_parse_commands() {
    assert_eq!(
        "1PR100".parse::<MotorCommand>().unwrap(),
        MotorCommand::Relative { axis: 1, steps: 100 }
    );
    assert_eq!(
        "2PR-5".parse::<MotorCommand>().unwrap(),
        MotorCommand::Relative { axis: 2, steps: -5 }
    );
    assert_eq!(
        "2PR".parse::<MotorCommand>().unwrap(),
        MotorCommand::Relative { axis: 2, steps: 0 }
    );
    assert_eq!("ab".parse::<MotorCommand>().unwrap(), MotorCommand::Abort);
    assert_eq!(" VE? ".parse::<MotorCommand>().unwrap(), MotorCommand::Version);

    for bad in ["", "PR100", "1XX5", "1PRabc", "300PR1"] {
        let err = bad.parse::<MotorCommand>().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidParameters, "{}", bad);
    }
}

#[test]
fn test_format_roundtrip() {
    for text in ["1PR100", "2PR-5", "AB", "VE?"] {
        assert_eq!(text.parse::<MotorCommand>().unwrap().to_string(), text);
    }
}

#[test]
fn test_step_and_halt() {
    let (motor, log) = scripted_motor();
    motor.step(100).unwrap();
    motor.step_y(-3).unwrap();
    motor.halt().unwrap();
    assert_eq!(log.written(), "1PR100\r2PR-3\rAB\r");
}

#[test]
fn test_move_y_micrometers() {
    let (motor, log) = scripted_motor();
    assert_eq!(motor.move_y_micrometers(60.0).unwrap(), 2000);
    assert_eq!(motor.move_y_micrometers(-0.3).unwrap(), -10);
    assert_eq!(log.written(), "2PR2000\r2PR-10\r");
}

#[test]
fn test_move_micrometers_uses_main_driver() {
    let (motor, log) = scripted_motor();
    assert_eq!(motor.move_micrometers(60.0).unwrap(), 2000);
    assert_eq!(log.written(), "1PR2000\r");
}

#[test]
fn test_version_health_check() {
    let (motor, _log) = scripted_motor();
    assert_eq!(motor.version().unwrap(), "8742 Version 2.2 08/01/13");

    let (port, _log) = ScriptedPort::silent(b'\r');
    let silent = CoarseMotor::with_transport(
        MotorConfig {
            reply_timeout_s: 0.01,
            ..Default::default()
        },
        "silent",
        Some(Box::new(port)),
    );
    let err = silent.version().unwrap_err();
    assert_eq!(err.kind(), crate::error::ErrorKind::ProtocolTimeout);
}

#[test]
fn test_non_finite_reply_timeout_sends_nothing() {
    let (port, log) = ScriptedPort::silent(b'\r');
    let motor = CoarseMotor::with_transport(
        MotorConfig {
            reply_timeout_s: f64::NAN,
            ..Default::default()
        },
        "broken",
        Some(Box::new(port)),
    );
    let err = motor.version().unwrap_err();
    assert_eq!(err.kind(), crate::error::ErrorKind::InvalidParameters);
    assert_eq!(log.written(), "");
}

#[test]
fn test_discover_without_devices() {
    let config = MotorConfig {
        vendor_id: 0xdead,
        product_id: 0xbeef,
        ..Default::default()
    };
    assert!(discover(&config, &ControlFlags::new(true)).unwrap().is_empty());
    assert!(matches!(
        discover(&config, &ControlFlags::new(false)),
        Err(MotorError::DeviceUnavailable(_))
    ));
}
