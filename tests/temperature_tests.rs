use adax_cloud::{Error, HeatingMode, Room, Temperature};

#[test]
fn from_hundredths() {
    let t = Temperature::from_hundredths(2130.0);
    assert!((t.celsius() - 21.3).abs() < 1e-9);
    assert_eq!(Temperature::from_hundredths(2050.0).celsius(), 20.5);
}

#[test]
fn wire_form_truncates() {
    assert_eq!(Temperature::from_celsius(20.5).to_wire(), "2050");
    assert_eq!(Temperature::from_celsius(23.0).to_wire(), "2300");
    assert_eq!(Temperature::from_celsius(21.239).to_hundredths(), 2123);
    assert_eq!(Temperature::from_celsius(5.0).to_wire(), "500");
}

#[test]
fn validate_bounds() {
    assert!(Temperature::from_celsius(5.0).validate().is_ok());
    assert!(Temperature::from_celsius(35.0).validate().is_ok());
    assert!(matches!(
        Temperature::from_celsius(4.5).validate(),
        Err(Error::InvalidTemperature { .. })
    ));
    assert!(Temperature::from_celsius(35.5).validate().is_err());
    assert!(Temperature::from_celsius(f64::NAN).validate().is_err());
}

#[test]
fn display() {
    let t = Temperature::from_celsius(22.5);
    assert_eq!(format!("{t}"), "22.5\u{00b0}C");
}

#[test]
fn heating_mode_names() {
    assert_eq!(HeatingMode::Heat.as_str(), "heat");
    assert_eq!(HeatingMode::Off.as_str(), "off");
    assert!(HeatingMode::Heat.is_heating());
    assert!(!HeatingMode::Off.is_heating());
}

#[test]
fn room_identity_and_mode() {
    let room = Room {
        id: 3,
        home_id: 11,
        name: "Gang".into(),
        heating_enabled: false,
        ..Default::default()
    };
    assert_eq!(room.unique_id(), "11_3");
    assert_eq!(room.mode(), HeatingMode::Off);
}
