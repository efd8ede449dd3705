use pscu::deferred::DeferredExecutor;
use pscu::drivers::Tca9548;
use pscu::i2c::{BusTransport, I2cError, I2cTree};
use pscu::sim::{SimBus, SimChip, SimTransaction};
use std::time::{Duration, Instant};

const MUX: u8 = 0x70;

fn mux_bus() -> SimBus {
    let mut bus = SimBus::new();
    bus.add_mux(MUX);
    bus.add_chip(Some(1), 0x20, SimChip::registers());
    bus.add_chip(Some(2), 0x21, SimChip::registers());
    bus
}

fn selects(log: &[SimTransaction]) -> Vec<u8> {
    log.iter()
        .filter_map(|t| match t {
            SimTransaction::Write { address, bytes, .. } if *address == MUX => bytes.first().copied(),
            _ => None,
        })
        .collect()
}

#[test]
fn test_select_precedes_each_device_once() {
    let mut tree = I2cTree::new(BusTransport::new(mux_bus()));
    let mux = Tca9548::new(&mut tree, MUX);
    let a = mux.attach_device(&mut tree, 1, 0x20).unwrap();
    let b = mux.attach_device(&mut tree, 2, 0x21).unwrap();

    a.write8(&mut tree, 0x00, 0x11).unwrap();
    a.write8(&mut tree, 0x01, 0x12).unwrap();
    b.write8(&mut tree, 0x00, 0x22).unwrap();

    let log = tree.transport().bus().log();
    assert_eq!(selects(log), vec![1 << 1, 1 << 2]);
    assert_eq!(log.len(), 5);
    assert_eq!(log[0].address(), MUX);
    assert_eq!(log[1].address(), 0x20);
    assert_eq!(log[2].address(), 0x20);
    assert_eq!(log[3].address(), MUX);
    assert_eq!(log[4].address(), 0x21);
    assert_eq!(log[4].channel(), Some(2));
}

#[test]
fn test_reads_also_select() {
    let mut tree = I2cTree::new(BusTransport::new(mux_bus()));
    let mux = Tca9548::new(&mut tree, MUX);
    let a = mux.attach_device(&mut tree, 1, 0x20).unwrap();
    let b = mux.attach_device(&mut tree, 2, 0x21).unwrap();

    b.write8(&mut tree, 0x05, 0x5A).unwrap();
    assert_eq!(a.read_u8(&mut tree, 0x05).unwrap(), Some(0));
    assert_eq!(b.read_u8(&mut tree, 0x05).unwrap(), Some(0x5A));
    assert_eq!(selects(tree.transport().bus().log()), vec![1 << 2, 1 << 1, 1 << 2]);
}

#[test]
fn test_removed_device_is_rejected() {
    let mut tree = I2cTree::new(BusTransport::new(mux_bus()));
    let mux = Tca9548::new(&mut tree, MUX);
    let a = mux.attach_device(&mut tree, 1, 0x20).unwrap();

    mux.remove(&mut tree, a.id()).unwrap();
    assert!(!tree.is_attached(mux.id(), a.id()));
    assert!(matches!(mux.remove(&mut tree, a.id()), Err(I2cError::NotAttached { .. })));
}

#[test]
fn test_executor_releases_fifo_with_spacing() {
    let delay = Duration::from_millis(250);
    let mut executor = DeferredExecutor::new();
    for n in 0..5 {
        executor.enqueue(n, delay).unwrap();
    }

    let start = Instant::now();
    let mut released = Vec::new();
    let mut now = start;
    while executor.pending() > 0 {
        if let Some(n) = executor.release(now) {
            released.push((n, now));
        }
        now += Duration::from_millis(50);
    }

    assert_eq!(released.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    for pair in released.windows(2) {
        assert!(pair[1].1 - pair[0].1 >= delay);
    }
}

#[test]
fn test_executor_clear_stops_releases() {
    let mut executor = DeferredExecutor::new();
    for n in 0..8 {
        executor.enqueue(n, Duration::from_millis(10)).unwrap();
    }
    let start = Instant::now();
    assert_eq!(executor.release(start), Some(0));
    assert_eq!(executor.release(start + Duration::from_millis(10)), Some(1));

    assert_eq!(executor.clear(), 6);
    assert_eq!(executor.pending(), 0);
    assert_eq!(executor.release(start + Duration::from_secs(1)), None);
    assert_eq!(executor.get_stats().total_released, 2);
}
