//! Front-panel LCD.
//!
//! [`UsbLcd`] speaks the USB LCD backpack command set over any byte sink;
//! [`LcdDisplay`] keeps the page list, renders the current page from a
//! [`Pscu`] snapshot and only pushes text or backlight changes when they
//! differ from what is already on the glass.

use std::fmt;
use std::io::{self, Write};
use std::time::Duration;

use arrayvec::ArrayVec;
use chrono::NaiveTime;
use embedded_hal::i2c::I2c;
use thiserror::Error;
use tracing::debug;

use crate::pscu::quad::NUM_CHANNELS as QUAD_CHANNELS;
use crate::pscu::sensors::{InterlockCategory, SensorChannel};
use crate::pscu::topology::NUM_QUADS;
use crate::pscu::{Pscu, NUM_TEMPERATURES};

pub const DEFAULT_ROWS: u8 = 4;
pub const DEFAULT_COLS: u8 = 20;
/// Backpack serial line rate.
pub const LCD_BAUD_RATE: u32 = 57_600;
const LCD_WRITE_TIMEOUT: Duration = Duration::from_millis(500);
pub const TEMPS_PER_PAGE: usize = 2;
pub const NUM_TEMP_PAGES: usize = (NUM_TEMPERATURES + 1) / TEMPS_PER_PAGE;

/// Shown when the server exits.
pub const NOT_RUNNING_MESSAGE: &str = "\r   PSCU server is\r    NOT running\r\r";

const QUAD_NAMES: [char; NUM_QUADS] = ['A', 'B', 'C', 'D'];

mod cmd {
    pub const START: u8 = 0xFE;
    pub const LCD_SIZE: u8 = 0xD1;
    pub const HOME: u8 = 0x48;
    pub const CLEAR: u8 = 0x58;
    pub const RGB_BACKLIGHT: u8 = 0xD0;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const RED: Self = Self(0xFF, 0x00, 0x00);
    pub const GREEN: Self = Self(0x00, 0xFF, 0x00);
    pub const BLUE: Self = Self(0x00, 0x00, 0xFF);
    pub const WHITE: Self = Self(0xFF, 0xFF, 0xFF);
    pub const YELLOW: Self = Self(0xFF, 0x22, 0x00);
}

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("failed to open LCD device {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("LCD write failed: {0}")]
    Io(#[from] io::Error),
}

/// LCD module behind a USB serial backpack.
pub struct UsbLcd {
    port: Box<dyn Write + Send>,
    rows: u8,
    cols: u8,
}

impl UsbLcd {
    /// Take ownership of the port and program the panel geometry.
    pub fn new(port: Box<dyn Write + Send>, rows: u8, cols: u8) -> io::Result<Self> {
        let mut lcd = Self { port, rows, cols };
        lcd.write_cmd(&[cmd::LCD_SIZE, cols, rows])?;
        Ok(lcd)
    }

    pub fn rows(&self) -> u8 {
        self.rows
    }

    pub fn cols(&self) -> u8 {
        self.cols
    }

    fn write_cmd(&mut self, command: &[u8]) -> io::Result<()> {
        let mut frame: ArrayVec<u8, 8> = ArrayVec::new();
        frame.push(cmd::START);
        frame
            .try_extend_from_slice(command)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "LCD command too long"))?;
        self.port.write_all(&frame)?;
        self.port.flush()
    }

    pub fn home(&mut self) -> io::Result<()> {
        self.write_cmd(&[cmd::HOME])
    }

    pub fn clear(&mut self) -> io::Result<()> {
        self.write_cmd(&[cmd::CLEAR])
    }

    pub fn write_text(&mut self, text: &str) -> io::Result<()> {
        self.port.write_all(text.as_bytes())?;
        self.port.flush()
    }

    pub fn set_backlight_colour(&mut self, colour: Rgb) -> io::Result<()> {
        self.write_cmd(&[cmd::RGB_BACKLIGHT, colour.0, colour.1, colour.2])
    }
}

/// One screen of the front panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Overview,
    /// Temperature sensors, two per page.
    Temperature(usize),
    Humidity,
    Fan,
    Pump,
    Position,
    Trace,
    QuadSupply,
    /// Two channels of one quad box.
    Quad { quad: usize, first_channel: usize },
}

/// Pages in the order the panel buttons cycle through them.
pub fn registered_pages() -> Vec<Page> {
    let mut pages = vec![Page::Overview];
    pages.extend((0..NUM_TEMP_PAGES).map(Page::Temperature));
    pages.extend([
        Page::Humidity,
        Page::Fan,
        Page::Pump,
        Page::Position,
        Page::Trace,
        Page::QuadSupply,
    ]);
    for quad in 0..NUM_QUADS {
        for first_channel in (0..QUAD_CHANNELS).step_by(2) {
            pages.push(Page::Quad { quad, first_channel });
        }
    }
    pages
}

pub struct LcdDisplay {
    lcd: UsbLcd,
    pages: Vec<Page>,
    current: usize,
    buffer: String,
    colour: Option<Rgb>,
}

impl fmt::Debug for LcdDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LcdDisplay")
            .field("rows", &self.lcd.rows)
            .field("cols", &self.lcd.cols)
            .field("current", &self.current)
            .field("colour", &self.colour)
            .finish_non_exhaustive()
    }
}

impl LcdDisplay {
    /// Open the backpack's serial device at [`LCD_BAUD_RATE`].
    pub fn open(path: &str, rows: u8, cols: u8) -> Result<Self, DisplayError> {
        let port = serialport::new(path, LCD_BAUD_RATE)
            .timeout(LCD_WRITE_TIMEOUT)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|source| DisplayError::Open {
                path: path.to_string(),
                source,
            })?;
        Self::with_port(Box::new(port), rows, cols)
    }

    pub fn with_port(port: Box<dyn Write + Send>, rows: u8, cols: u8) -> Result<Self, DisplayError> {
        let mut lcd = UsbLcd::new(port, rows, cols)?;
        lcd.clear()?;
        Ok(Self {
            lcd,
            pages: registered_pages(),
            current: 0,
            buffer: String::new(),
            colour: None,
        })
    }

    pub fn next_page(&mut self) {
        self.current = (self.current + 1) % self.pages.len();
    }

    pub fn previous_page(&mut self) {
        self.current = (self.current + self.pages.len() - 1) % self.pages.len();
    }

    pub fn current_page(&self) -> Page {
        self.pages[self.current]
    }

    pub fn page_index(&self) -> usize {
        self.current
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Text last written to the panel.
    pub fn content(&self) -> &str {
        &self.buffer
    }

    pub fn set_colour(&mut self, colour: Rgb) -> Result<(), DisplayError> {
        if self.colour != Some(colour) {
            self.lcd.set_backlight_colour(colour)?;
            self.colour = Some(colour);
        }
        Ok(())
    }

    pub fn set_content(&mut self, content: &str) -> Result<(), DisplayError> {
        if content != self.buffer {
            debug!("LCD page {} updated", self.current + 1);
            self.buffer = content.to_string();
            self.lcd.home()?;
            self.lcd.write_text(&self.buffer)?;
        }
        Ok(())
    }

    pub fn render<B: I2c>(&self, pscu: &Pscu<B>, now: NaiveTime) -> String {
        render_page(pscu, self.current_page(), self.current, self.pages.len(), now)
    }
}

fn clock(now: NaiveTime) -> String {
    now.format("%H:%M:%S").to_string()
}

fn state_str(ok: bool, latched: bool) -> String {
    if ok {
        format!("OK{}", if latched { "" } else { "/Latch" })
    } else {
        "TRIPPED".to_string()
    }
}

fn trace_str(traces: impl IntoIterator<Item = bool>) -> String {
    traces.into_iter().map(|t| if t { '*' } else { '_' }).collect()
}

fn sensor_row(index: usize, sensor: &SensorChannel, unit: char) -> String {
    if sensor.disabled {
        format!("{:2}:{:17}", index + 1, "N/C")
    } else {
        format!(
            "{:2}:{:<10.10}:{:4.1}{}{:1}",
            index + 1,
            sensor.name.replace(' ', ""),
            sensor.value,
            unit,
            if sensor.tripped { "*" } else { " " }
        )
    }
}

/// Render one page as the `\r`-separated text the panel expects. Every page
/// opens with the time and the page position.
pub fn render_page<B: I2c>(pscu: &Pscu<B>, page: Page, index: usize, count: usize, now: NaiveTime) -> String {
    let interlock = pscu.interlock();
    let state = |category| state_str(interlock.state(category), interlock.latched(category));

    let mut out = format!("{:9}      {:2}/{:2}", clock(now), index + 1, count);
    match page {
        Page::Overview => {
            out.push_str(&format!("System  : {}\r", if interlock.healthy { "Healthy" } else { "ERROR" }));
            out.push_str(&format!("Latched : {}\r", if interlock.all_latched() { "No" } else { "YES" }));
            out.push_str(&format!("Armed   : {}\r", if interlock.armed { "Yes" } else { "No" }));
        }
        Page::Temperature(temp_page) => {
            out.push_str(&format!(
                "Temp {}/{}: {}\r",
                temp_page + 1,
                NUM_TEMP_PAGES,
                state(InterlockCategory::Temperature)
            ));
            let start = temp_page * TEMPS_PER_PAGE;
            for chan in start..start + TEMPS_PER_PAGE {
                match pscu.temperatures().get(chan) {
                    Some(sensor) => out.push_str(&sensor_row(chan, sensor, 'C')),
                    None => out.push('\r'),
                }
            }
        }
        Page::Humidity => {
            out.push_str(&format!("Humidity: {}\r", state(InterlockCategory::Humidity)));
            for (chan, sensor) in pscu.humidities().iter().enumerate() {
                out.push_str(&sensor_row(chan, sensor, '%'));
            }
        }
        Page::Fan => {
            out.push_str(&format!("Fan: {}\r", state(InterlockCategory::Fan)));
            out.push_str(&format!("Target: {:6.1}%\r", pscu.get_fan_target()));
            out.push_str(&format!("Speed : {:6.1}rpm\r", pscu.fan().value));
            out.push_str(&clock(now));
        }
        Page::Pump => {
            out.push_str(&format!("Pump: {}\r", state(InterlockCategory::Pump)));
            out.push_str(&format!("Flow: {:.1}l/min\r", pscu.pump().value));
            out.push('\r');
        }
        Page::Position => {
            out.push_str(&format!("Position: {:.2}mm\r", pscu.get_position()));
            out.push_str("** DO NOT EXCEED ** ");
            out.push_str("**  +/-35.5mm!   ** ");
        }
        Page::Trace => {
            out.push_str(&format!("Trace: {}\r", state(InterlockCategory::Trace)));
            out.push_str(&format!("Temp: {}\r", trace_str(pscu.temperatures().iter().map(|s| s.trace))));
            out.push_str(&format!(
                "Hum: {} Quad: {}\r",
                trace_str(pscu.humidities().iter().map(|s| s.trace)),
                trace_str(pscu.quad_traces().iter().copied())
            ));
        }
        Page::QuadSupply => {
            let supply: [f64; NUM_QUADS] =
                core::array::from_fn(|q| pscu.quads().get(q).map_or(0.0, |quad| quad.get_supply_voltage()));
            out.push_str("Quad supplies\r");
            out.push_str(&format!("A: {:4.1}V B:{:4.1}V\r", supply[0], supply[1]));
            out.push_str(&format!("C: {:4.1}V D:{:4.1}V\r", supply[2], supply[3]));
        }
        Page::Quad { quad, first_channel } => {
            let name = QUAD_NAMES.get(quad).copied().unwrap_or('?');
            out.push_str(&format!(
                "Quad: {} Chans: {}/{} \r",
                name,
                first_channel + 1,
                first_channel + 2
            ));
            let channels = pscu.quads().get(quad).map(|q| q.channels());
            for chan in first_channel..first_channel + 2 {
                let Some(state) = channels.and_then(|c| c.get(chan)) else {
                    continue;
                };
                if state.fet_failed {
                    out.push_str(&format!("{}:FET failed?({:4.1}V)", chan + 1, state.fuse_voltage));
                } else if state.fuse_blown {
                    out.push_str(&format!("{}:Fuse blown?({:4.1}V)", chan + 1, state.fuse_voltage));
                } else {
                    out.push_str(&format!(
                        "{}:{} {:4.1}V {:4.1}A OK",
                        chan + 1,
                        if state.enabled { "ON " } else { "OFF" },
                        state.voltage,
                        state.current
                    ));
                }
            }
        }
    }
    out
}
