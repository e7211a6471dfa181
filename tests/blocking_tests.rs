use hidkit::backends::virtual_hid::{VirtualBackend, VirtualDevice, VirtualDeviceSpec};
use hidkit::{HidDevice, HidError, Manager, ReadOutcome};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn open_one() -> (HidDevice, VirtualDevice) {
    let bus = VirtualBackend::new();
    let vdev = bus.attach(VirtualDeviceSpec::new(0x1209, 0xa1e5));
    let mgr = Manager::with_backend(bus);
    (mgr.open(0x1209, 0xa1e5, None).unwrap(), vdev)
}

#[test]
fn nonblocking_read_returns_immediately() {
    let (dev, vdev) = open_one();
    dev.set_blocking(false).unwrap();

    let start = Instant::now();
    assert_eq!(dev.read(64).unwrap(), ReadOutcome::WouldBlock);
    assert!(start.elapsed() < Duration::from_millis(50));

    vdev.feed(&[9, 9]);
    assert_eq!(dev.read(64).unwrap(), ReadOutcome::Data(vec![9, 9]));
}

#[test]
fn blocking_read_times_out() {
    let (dev, _vdev) = open_one();
    let start = Instant::now();
    let outcome = dev.read_timeout(64, Some(Duration::from_millis(100))).unwrap();
    let elapsed = start.elapsed();

    assert_eq!(outcome, ReadOutcome::TimedOut);
    assert!(elapsed >= Duration::from_millis(100), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(400), "returned late: {elapsed:?}");
}

#[test]
fn blocking_read_returns_pending_data_before_timeout() {
    let (dev, vdev) = open_one();
    vdev.feed(&[1, 2, 3]);
    let outcome = dev.read_timeout(64, Some(Duration::from_secs(5))).unwrap();
    assert_eq!(outcome, ReadOutcome::Data(vec![1, 2, 3]));
}

#[test]
fn blocking_read_wakes_on_data_from_another_thread() {
    let (dev, vdev) = open_one();
    let feeder = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        vdev.feed(&[0x42]);
    });

    let start = Instant::now();
    assert_eq!(dev.read(64).unwrap(), ReadOutcome::Data(vec![0x42]));
    assert!(start.elapsed() < Duration::from_secs(2));
    feeder.join().unwrap();
}

#[test]
fn close_cancels_blocked_read() {
    let (dev, _vdev) = open_one();
    let dev = Arc::new(dev);

    let reader = {
        let dev = dev.clone();
        thread::spawn(move || {
            let result = dev.read(64);
            (result, Instant::now())
        })
    };

    thread::sleep(Duration::from_millis(100));
    let closed_at = Instant::now();
    dev.close().unwrap();

    let (result, returned_at) = reader.join().unwrap();
    assert!(matches!(result, Err(HidError::HandleClosed)), "got {result:?}");
    let latency = returned_at.saturating_duration_since(closed_at);
    assert!(latency < Duration::from_millis(200), "cancellation took {latency:?}");
}

#[test]
fn close_cancels_read_with_long_timeout() {
    let (dev, _vdev) = open_one();
    let dev = Arc::new(dev);

    let reader = {
        let dev = dev.clone();
        thread::spawn(move || dev.read_timeout(64, Some(Duration::from_secs(30))))
    };

    thread::sleep(Duration::from_millis(50));
    let start = Instant::now();
    dev.close().unwrap();
    let result = reader.join().unwrap();
    assert!(matches!(result, Err(HidError::HandleClosed)));
    assert!(start.elapsed() < Duration::from_millis(200));
}

#[test]
fn unplug_interrupts_blocked_read() {
    let (dev, vdev) = open_one();
    let dev = Arc::new(dev);

    let reader = {
        let dev = dev.clone();
        thread::spawn(move || dev.read(64))
    };

    thread::sleep(Duration::from_millis(50));
    vdev.unplug();
    let result = reader.join().unwrap();
    assert!(matches!(&result, Err(e) if e.is_disconnect()), "got {result:?}");
    assert!(matches!(dev.read(64), Err(HidError::HandleClosed)));
}

#[test]
fn mode_switch_applies_to_next_read() {
    let (dev, _vdev) = open_one();
    dev.set_blocking(false).unwrap();
    assert_eq!(dev.read(8).unwrap(), ReadOutcome::WouldBlock);

    dev.set_blocking(true).unwrap();
    assert_eq!(
        dev.read_timeout(8, Some(Duration::from_millis(30))).unwrap(),
        ReadOutcome::TimedOut
    );
}

#[test]
fn oversized_poll_interval_still_cancels_promptly() {
    let bus = VirtualBackend::new();
    bus.attach(VirtualDeviceSpec::new(0x1209, 0xa1e5));
    let mut mgr = Manager::with_backend(bus);
    mgr.set_poll_interval(Duration::from_secs(1));
    let dev = Arc::new(mgr.open(0x1209, 0xa1e5, None).unwrap());

    let reader = {
        let dev = dev.clone();
        thread::spawn(move || (dev.read(64), Instant::now()))
    };

    thread::sleep(Duration::from_millis(50));
    let closed_at = Instant::now();
    dev.close().unwrap();

    let (result, returned_at) = reader.join().unwrap();
    assert!(matches!(result, Err(HidError::HandleClosed)), "got {result:?}");
    let latency = returned_at.saturating_duration_since(closed_at);
    assert!(latency < Duration::from_millis(200), "cancellation took {latency:?}");
}
