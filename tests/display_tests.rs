use chrono::NaiveTime;
use pscu::display::{registered_pages, render_page, LcdDisplay, Page, NUM_TEMP_PAGES};
use pscu::i2c::BusTransport;
use pscu::pscu::{Pscu, PscuOptions};
use pscu::sim::SimBus;
use std::io;

fn polled() -> Pscu<SimBus> {
    let mut unit = Pscu::new(BusTransport::new(SimBus::pscu()), PscuOptions::default()).unwrap();
    unit.poll_all_sensors().unwrap();
    unit
}

fn at_010203() -> NaiveTime {
    NaiveTime::from_hms_opt(1, 2, 3).unwrap()
}

fn page(unit: &Pscu<SimBus>, page: Page) -> String {
    let pages = registered_pages();
    let index = pages.iter().position(|p| *p == page).unwrap();
    render_page(unit, page, index, pages.len(), at_010203())
}

#[test]
fn test_header_shows_time_and_position() {
    let unit = polled();
    let text = page(&unit, Page::Overview);
    assert!(text.starts_with(&format!("{:9}      {:2}/{:2}", "01:02:03", 1, 21)));
    assert!(text.contains("System  : Healthy\r"));
    assert!(text.contains("Latched : No\r"));
}

#[test]
fn test_temperature_pages() {
    let unit = polled();
    let coolant = page(&unit, Page::Temperature(4));
    assert!(coolant.contains("Temp 5/6: OK\r"));
    assert!(coolant.contains(" 9:CoolantOut:"));
    assert!(coolant.contains("10:CoolantIn :"));

    let unconnected = page(&unit, Page::Temperature(3));
    assert!(unconnected.contains(" 7:N/C"));
    assert!(unconnected.contains(" 8:N/C"));

    // Eleven sensors leave the last page half empty.
    let last = page(&unit, Page::Temperature(NUM_TEMP_PAGES - 1));
    assert!(last.contains("11:N/C"));
    assert!(last.ends_with('\r'));
}

#[test]
fn test_trace_and_supply_pages() {
    let unit = polled();
    let trace = page(&unit, Page::Trace);
    assert!(trace.contains(&format!("Temp: {}\r", "*".repeat(11))));
    assert!(trace.contains("Hum: ** Quad: ****\r"));

    let supply = page(&unit, Page::QuadSupply);
    assert!(supply.contains("A: 48.0V B:48.0V\r"));
    assert!(supply.contains("C: 48.0V D:48.0V\r"));
}

#[test]
fn test_quad_channel_page() {
    let mut unit = polled();
    let text = page(&unit, Page::Quad { quad: 0, first_channel: 0 });
    assert!(text.contains("Quad: A Chans: 1/2 \r"));
    assert!(text.contains("1:OFF  0.0V  0.0A OK"));

    unit.bus_mut().set_adc_scaled(Some(0), pscu::pscu::topology::QUAD_ADC_FUSE, 1, 40.0 / 80.0);
    unit.poll_all_sensors().unwrap();
    let text = page(&unit, Page::Quad { quad: 0, first_channel: 0 });
    assert!(text.contains("2:Fuse blown?(40.0V)"));
}

#[test]
fn test_panel_follows_page_buttons() {
    let mut unit = polled().with_display(LcdDisplay::with_port(Box::new(io::sink()), 4, 20));
    unit.lcd_next_page();
    assert_eq!(unit.display().unwrap().current_page(), Page::Temperature(0));
    unit.lcd_previous_page();
    unit.lcd_previous_page();
    assert_eq!(
        unit.display().unwrap().current_page(),
        Page::Quad { quad: 3, first_channel: 2 }
    );

    unit.update_lcd();
    assert!(unit.display().unwrap().content().contains("Quad: D Chans: 3/4"));
    assert!(!unit.get_display_error());
}
