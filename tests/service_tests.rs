use pscu::backplane::{self, Backplane};
use pscu::config::PscuConfig;
use pscu::controller::{ApiRequest, PscuController, STATUS_BAD_REQUEST, STATUS_OK};
use pscu::display::{LcdDisplay, Rgb};
use pscu::i2c::BusTransport;
use pscu::params::{ParamError, ParamTree};
use pscu::pscu::topology::*;
use pscu::pscu::Pscu;
use pscu::sim::SimBus;
use serde_json::json;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Serial port stand-in that the test can still read after handing it over.
#[derive(Clone, Default)]
struct PanelPort(Arc<Mutex<Vec<u8>>>);

impl PanelPort {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl Write for PanelPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A port whose device has gone away.
struct DeadPort;

impl Write for DeadPort {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn unit() -> Pscu<SimBus> {
    let config = PscuConfig::default();
    let transport = BusTransport::with_config(SimBus::pscu(), config.bus_config());
    Pscu::new(transport, config.pscu_options()).unwrap()
}

fn controller() -> PscuController<Pscu<SimBus>> {
    let mut controller = PscuController::new(unit());
    controller.start();
    controller
}

#[test]
fn test_tick_releases_before_polling() {
    let mut controller = controller();
    let response = controller.handle(&ApiRequest::put("allEnabled", json!(true)));
    assert_eq!(response.status, STATUS_OK);
    assert_eq!(response.body, json!({ "allEnabled": true }));

    let start = Instant::now();
    controller.on_tick(start).unwrap();
    let unit = controller.unit();
    assert_eq!(unit.pending_enables(), 15);
    // The poll in the same tick already sees the released enable.
    assert!(unit.quad(0).unwrap().get_enable(0).unwrap());
    assert!(!unit.quad(0).unwrap().get_enable(1).unwrap());

    controller.on_tick(start + Duration::from_millis(50)).unwrap();
    assert_eq!(controller.unit().pending_enables(), 15);
    controller.on_tick(start + Duration::from_secs(1)).unwrap();
    assert_eq!(controller.unit().pending_enables(), 14);
    assert_eq!(controller.get_state().tick_count, 3);
}

#[test]
fn test_tick_refreshes_display_before_polling() {
    let port = PanelPort::default();
    let display = LcdDisplay::with_port(Box::new(port.clone()), 4, 20);
    let mut controller = PscuController::new(unit().with_display(display));
    controller.start();
    port.take();

    let start = Instant::now();
    controller.on_tick(start).unwrap();
    // Drawn from the snapshot taken before this tick's poll.
    let content = controller.unit().display().unwrap().content().to_string();
    assert!(content.contains("System  : ERROR"));
    let red = [0xFE, 0xD0, Rgb::RED.0, Rgb::RED.1, Rgb::RED.2];
    assert!(port.take().starts_with(&red));

    controller.on_tick(start + Duration::from_millis(50)).unwrap();
    let content = controller.unit().display().unwrap().content().to_string();
    assert!(content.contains("System  : Healthy"));
    assert!(content.contains("Armed   : No"));
    let green = [0xFE, 0xD0, Rgb::GREEN.0, Rgb::GREEN.1, Rgb::GREEN.2];
    assert!(port.take().starts_with(&green));
}

#[test]
fn test_display_failure_sets_error_flag() {
    let display = LcdDisplay::with_port(Box::new(DeadPort), 4, 20);
    assert!(display.is_err());
    let mut controller = PscuController::new(unit().with_display(display));
    controller.start();

    controller.on_tick(Instant::now()).unwrap();
    assert!(controller.unit().get_display_error());
    let response = controller.handle(&ApiRequest::get("displayError"));
    assert_eq!(response.body, json!({ "displayError": true }));
}

#[test]
fn test_missing_display_device_sets_error_flag() {
    let unit = unit().with_display(LcdDisplay::open("/nonexistent/ttyACM9", 4, 20));
    assert!(unit.get_display_error());
    assert!(unit.display().is_none());
}

#[test]
fn test_shutdown_shows_not_running() {
    let port = PanelPort::default();
    let display = LcdDisplay::with_port(Box::new(port.clone()), 4, 20);
    let mut controller = PscuController::new(unit().with_display(display));
    controller.start();
    controller.on_tick(Instant::now()).unwrap();
    controller.unit_mut().set_armed(true).unwrap();

    controller.shutdown();
    let content = controller.unit().display().unwrap().content().to_string();
    assert!(content.contains("PSCU server is"));
    assert!(content.contains("NOT running"));
    let written = port.take();
    assert!(written.windows(5).any(|w| w == [0xFE, 0xD0, 0xFF, 0x22, 0x00]));

    // Shutdown leaves the interlock as it was.
    controller.unit_mut().poll_all_sensors().unwrap();
    assert!(controller.unit().get_armed());
}

#[test]
fn test_line_protocol_round_trip() {
    let mut controller = controller();
    controller.on_tick(Instant::now()).unwrap();

    let response = controller.handle_line(r#"{"method": "GET", "path": "temperature/sensors/8/mode"}"#);
    assert_eq!(response.status, STATUS_OK);
    assert_eq!(response.body, json!({ "mode": "Under" }));

    let response = controller.handle_line(r#"{"method": "PUT", "path": "fan", "body": {"target": 60}}"#);
    assert_eq!(response.status, STATUS_OK);
    assert_eq!(response.body["fan"]["target"], json!(60.0));
    assert_eq!(response.body["fan"]["mode"], json!("Under"));
    assert_eq!(controller.unit().get_fan_target(), 60.0);

    let response = controller.handle_line(r#"{"method": "GET", "path": "quad/quads/9"}"#);
    assert_eq!(response.status, STATUS_BAD_REQUEST);
    assert!(response.body["error"].as_str().unwrap().contains("Invalid path"));

    let response = controller.handle_line(r#"{"method": "PUT", "path": "armed", "body": "maybe"}"#);
    assert_eq!(response.status, STATUS_BAD_REQUEST);
    assert_eq!(controller.get_state().rejected_requests, 2);
}

#[test]
fn test_quad_channel_enable_through_tree() {
    let mut controller = controller();
    controller.on_tick(Instant::now()).unwrap();

    let path = "quad/quads/2/channels/3/enabled";
    controller.handle(&ApiRequest::put(path, json!(true)));
    controller.unit_mut().poll_all_sensors().unwrap();
    let response = controller.handle(&ApiRequest::get(path));
    assert_eq!(response.body, json!({ "enabled": true }));
    assert_eq!(controller.unit().bus().inputs(Some(2), QUAD_GPIO), Some(1 << 7));
}

#[test]
fn test_backplane_tree() {
    let transport = BusTransport::new(SimBus::backplane());
    let unit = Backplane::new(transport, backplane::topology::MUX_ADDRESS).unwrap();
    let mut controller = PscuController::new(unit);
    controller.start();
    controller.on_tick(Instant::now()).unwrap();

    let unit = controller.unit();
    assert_eq!(unit.power_good(), &[true; backplane::NUM_POWER_GOOD]);
    let fraction = f64::from(0x400) / 4095.0;
    assert!((unit.get_current(0).unwrap() - fraction * 19.5).abs() < 1e-9);
    assert!((unit.get_voltage(7).unwrap() - fraction * 1.2).abs() < 1e-9);

    let response = controller.handle(&ApiRequest::get("current_voltage/9/name"));
    assert_eq!(response.body, json!({ "name": "VRESET" }));

    let response = controller.handle(&ApiRequest::put("psu_enabled", json!(true)));
    assert_eq!(response.body, json!({ "psu_enabled": true }));

    let response = controller.handle(&ApiRequest::put("resistors/0/value", json!(1.0)));
    assert_eq!(response.status, STATUS_OK);
    assert_eq!(response.body, json!({ "value": 1.0 }));

    let response = controller.handle(&ApiRequest::put("clock", json!(25.0)));
    assert_eq!(response.body, json!({ "clock": 25.0 }));

    let response = controller.handle(&ApiRequest::put("resistors/7/value", json!(1.0)));
    assert_eq!(response.status, STATUS_BAD_REQUEST);
}

#[test]
fn test_backplane_rejects_illegal_resistor() {
    let transport = BusTransport::new(SimBus::backplane());
    let mut unit = Backplane::new(transport, backplane::topology::MUX_ADDRESS).unwrap();
    assert!(matches!(
        unit.set("resistors/3/value", &json!(100.0)),
        Err(ParamError::Backplane(backplane::BackplaneError::IllegalValue { .. }))
    ));
    assert!(matches!(unit.set("clock", &json!("fast")), Err(ParamError::Decode { .. })));
}
