//! Service-side driver for a control unit.
//!
//! [`PscuController`] owns one unit and is the only thing that touches it:
//! the periodic tick and the request adapter both go through it, so once it
//! sits behind a mutex every bus transaction is serialised.

use std::time::{Duration, Instant};

use embedded_hal::i2c::I2c;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::backplane::{Backplane, BackplaneError};
use crate::params::{ParamError, ParamTree};
use crate::pscu::{Pscu, PscuError};

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("PSCU error: {0}")]
    Pscu(#[from] PscuError),

    #[error("backplane error: {0}")]
    Backplane(#[from] BackplaneError),
}

/// A unit the controller can drive on its tick.
pub trait ControlUnit: ParamTree {
    /// Release and carry out at most one deferred command.
    fn handle_deferred(&mut self, now: Instant) -> Result<(), ControllerError>;

    fn update_display(&mut self);

    fn poll_all_sensors(&mut self) -> Result<(), ControllerError>;

    /// Called once when the service stops.
    fn cleanup(&mut self);
}

impl<B: I2c> ControlUnit for Pscu<B> {
    fn handle_deferred(&mut self, now: Instant) -> Result<(), ControllerError> {
        if let Some(command) = Pscu::handle_deferred(self, now)? {
            debug!("Released deferred enable of quad {} channel {}", command.quad, command.channel);
        }
        Ok(())
    }

    fn update_display(&mut self) {
        self.update_lcd();
    }

    fn poll_all_sensors(&mut self) -> Result<(), ControllerError> {
        Ok(Pscu::poll_all_sensors(self)?)
    }

    fn cleanup(&mut self) {
        Pscu::cleanup(self);
    }
}

impl<B: I2c> ControlUnit for Backplane<B> {
    fn handle_deferred(&mut self, _now: Instant) -> Result<(), ControllerError> {
        Ok(())
    }

    fn update_display(&mut self) {}

    fn poll_all_sensors(&mut self) -> Result<(), ControllerError> {
        Ok(Backplane::poll_all_sensors(self)?)
    }

    fn cleanup(&mut self) {}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerState {
    pub running: bool,
    pub uptime_seconds: u64,
    pub tick_count: u32,
    pub failed_ticks: u32,
    pub request_count: u32,
    pub rejected_requests: u32,
    pub last_error: Option<String>,
    pub last_tick_us: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Put,
}

/// One line of the control protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: Method,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Put,
            path: path.into(),
            body: Some(body),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn ok(body: Value) -> Self {
        Self { status: STATUS_OK, body }
    }

    fn error(message: impl ToString) -> Self {
        Self {
            status: STATUS_BAD_REQUEST,
            body: json!({ "error": message.to_string() }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

pub struct PscuController<U> {
    unit: U,
    state: ControllerState,
    start_time: Instant,
}

impl<U: ControlUnit> PscuController<U> {
    pub fn new(unit: U) -> Self {
        Self {
            unit,
            state: ControllerState::default(),
            start_time: Instant::now(),
        }
    }

    pub fn start(&mut self) {
        self.state.running = true;
        self.start_time = Instant::now();
        info!("Controller started");
    }

    /// One cooperative update: release a deferred command, refresh the
    /// display, then poll every sensor. A failing stage does not stop the
    /// later ones; the first error is returned after all three have run.
    pub fn on_tick(&mut self, now: Instant) -> Result<(), ControllerError> {
        let tick_start = Instant::now();
        self.state.tick_count = self.state.tick_count.wrapping_add(1);
        self.state.uptime_seconds = now.saturating_duration_since(self.start_time).as_secs();

        let deferred = self.unit.handle_deferred(now);
        self.unit.update_display();
        let polled = self.unit.poll_all_sensors();

        let result = deferred.and(polled);
        if let Err(e) = &result {
            warn!("Update tick failed: {}", e);
            self.state.failed_ticks = self.state.failed_ticks.wrapping_add(1);
            self.state.last_error = Some(e.to_string());
        }

        self.state.last_tick_us = duration_us(tick_start.elapsed());
        trace!("Tick {} took {}us", self.state.tick_count, self.state.last_tick_us);
        result
    }

    /// Leave the unit in its stopped state. Outputs keep their last
    /// commanded levels.
    pub fn shutdown(&mut self) {
        if !self.state.running {
            return;
        }
        info!("Controller shutting down");
        self.unit.cleanup();
        self.state.running = false;
    }

    pub fn handle(&mut self, request: &ApiRequest) -> ApiResponse {
        self.state.request_count = self.state.request_count.wrapping_add(1);
        debug!("{:?} {}", request.method, request.path);

        let result = match request.method {
            Method::Get => self.unit.get(&request.path),
            Method::Put => self.put(&request.path, request.body.as_ref()),
        };

        match result {
            Ok(body) => ApiResponse::ok(body),
            Err(e) => {
                warn!("{:?} {} rejected: {}", request.method, request.path, e);
                self.state.rejected_requests = self.state.rejected_requests.wrapping_add(1);
                ApiResponse::error(e)
            }
        }
    }

    /// Decode one protocol line and handle it.
    pub fn handle_line(&mut self, line: &str) -> ApiResponse {
        match serde_json::from_str::<ApiRequest>(line) {
            Ok(request) => self.handle(&request),
            Err(e) => {
                self.state.request_count = self.state.request_count.wrapping_add(1);
                self.state.rejected_requests = self.state.rejected_requests.wrapping_add(1);
                ApiResponse::error(format!("Failed to decode request: {}", e))
            }
        }
    }

    fn put(&mut self, path: &str, body: Option<&Value>) -> Result<Value, ParamError> {
        let body = body.ok_or_else(|| ParamError::Decode {
            path: path.to_string(),
            reason: "missing request body".to_string(),
        })?;
        self.unit.set(path, body)?;
        self.unit.get(path)
    }

    pub fn unit(&self) -> &U {
        &self.unit
    }

    pub fn unit_mut(&mut self) -> &mut U {
        &mut self.unit
    }

    pub fn get_state(&self) -> &ControllerState {
        &self.state
    }
}

fn duration_us(duration: Duration) -> u32 {
    u32::try_from(duration.as_micros()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::BusTransport;
    use crate::pscu::PscuOptions;
    use crate::sim::SimBus;

    fn controller() -> PscuController<Pscu<SimBus>> {
        let unit = Pscu::new(BusTransport::new(SimBus::pscu()), PscuOptions::default()).unwrap();
        let mut controller = PscuController::new(unit);
        controller.start();
        controller
    }

    #[test]
    fn test_put_returns_written_value() {
        let mut controller = controller();
        let response = controller.handle(&ApiRequest::put("fan/target", json!(40)));
        assert!(response.is_ok());
        assert_eq!(response.body, json!({ "target": 40.0 }));
    }

    #[test]
    fn test_put_without_body_is_rejected() {
        let mut controller = controller();
        let request = ApiRequest {
            method: Method::Put,
            path: "armed".to_string(),
            body: None,
        };
        let response = controller.handle(&request);
        assert_eq!(response.status, STATUS_BAD_REQUEST);
        assert_eq!(controller.get_state().rejected_requests, 1);
    }

    #[test]
    fn test_malformed_line() {
        let mut controller = controller();
        let response = controller.handle_line("{\"method\": \"GET\", ");
        assert_eq!(response.status, STATUS_BAD_REQUEST);
        assert!(response.body["error"].as_str().unwrap().starts_with("Failed to decode request"));

        let response = controller.handle_line(r#"{"method": "DELETE", "path": "armed"}"#);
        assert_eq!(response.status, STATUS_BAD_REQUEST);
    }

    #[test]
    fn test_shutdown_runs_once() {
        let mut controller = controller();
        controller.shutdown();
        assert!(!controller.get_state().running);
        controller.shutdown();
        assert!(!controller.get_state().running);
    }

    #[test]
    fn test_counters_wrap() {
        let transport = BusTransport::with_config(
            SimBus::pscu(),
            crate::i2c::BusConfig {
                fault_policy: crate::i2c::FaultPolicy::Raise,
            },
        );
        let mut controller = PscuController::new(Pscu::new(transport, PscuOptions::default()).unwrap());
        controller.start();
        controller.state.request_count = u32::MAX;
        controller.state.rejected_requests = u32::MAX;
        controller.state.failed_ticks = u32::MAX;

        controller.handle_line("not json");
        controller
            .unit_mut()
            .bus_mut()
            .set_failing(Some(crate::pscu::topology::MISC_CHANNEL), 0x21, true);
        assert!(controller.on_tick(Instant::now()).is_err());

        let state = controller.get_state();
        assert_eq!((state.request_count, state.rejected_requests, state.failed_ticks), (0, 0, 0));
    }
}
