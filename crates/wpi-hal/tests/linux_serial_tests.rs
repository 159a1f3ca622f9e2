//! Serial tests for the Linux backend against a pseudo-terminal

use nix::pty::openpty;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use wpi_hal::{Fd, Hal, HalConfig, LinuxBackend, Serial, SerialRead, serial_printf};

/// A pty pair; the slave end stands in for a UART device node
struct PtyEnv {
    master: File,
    slave_path: PathBuf,
    #[allow(dead_code)]
    slave: std::os::fd::OwnedFd,
}

impl PtyEnv {
    fn new() -> Self {
        let pty = openpty(None, None).expect("Failed to open pty");
        let slave_path = fs::read_link(format!("/proc/self/fd/{}", pty.slave.as_raw_fd()))
            .expect("Failed to resolve pty slave path");

        Self {
            master: File::from(pty.master),
            slave_path,
            slave: pty.slave,
        }
    }

    fn read_master(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.master.read_exact(&mut buf).unwrap();
        buf
    }
}

fn linux_hal(config: HalConfig) -> Hal<LinuxBackend> {
    Hal::with_config(LinuxBackend::new(&config), config)
}

fn wait_for_bytes(serial: &mut Serial<'_, LinuxBackend>, fd: Fd, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while serial.data_avail(fd).unwrap() < count {
        assert!(Instant::now() < deadline, "bytes never arrived");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_pty_round_trip() {
    let mut env = PtyEnv::new();
    let mut hal = linux_hal(HalConfig::default());
    let mut serial = hal.serial();
    let fd = serial.open(&env.slave_path, 115_200).unwrap();

    env.master.write_all(b"OK").unwrap();
    wait_for_bytes(&mut serial, fd, 2);
    assert_eq!(serial.get_char(fd).unwrap(), SerialRead::Byte(b'O'));
    assert_eq!(serial.get_char(fd).unwrap(), SerialRead::Byte(b'K'));

    serial.put_char(fd, 65).unwrap();
    assert_eq!(env.read_master(1), b"A");

    serial.puts(fd, "AT\r\n").unwrap();
    assert_eq!(env.read_master(4), b"AT\r\n");

    serial_printf!(serial, fd, "v={}", 42).unwrap();
    assert_eq!(env.read_master(4), b"v=42");

    serial.close(fd).unwrap();
}

#[test]
fn test_pty_short_timeout() {
    let env = PtyEnv::new();
    let mut hal = linux_hal(HalConfig::default());
    let mut serial = hal.serial();
    let fd = serial.open(&env.slave_path, 9600).unwrap();

    let started = Instant::now();
    let read = serial
        .get_char_timeout(fd, Duration::from_millis(200))
        .unwrap();
    assert_eq!(read, SerialRead::Timeout);
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_pty_flush_discards_input() {
    let mut env = PtyEnv::new();
    let mut hal = linux_hal(HalConfig::default());
    let mut serial = hal.serial();
    let fd = serial.open(&env.slave_path, 9600).unwrap();

    env.master.write_all(b"stale").unwrap();
    wait_for_bytes(&mut serial, fd, 5);
    serial.flush(fd).unwrap();
    assert_eq!(serial.data_avail(fd).unwrap(), 0);
}

#[test]
fn test_pty_open_errors() {
    let env = PtyEnv::new();
    let mut hal = linux_hal(HalConfig::default());
    let mut serial = hal.serial();

    assert!(serial.open(&env.slave_path, 12_345).unwrap_err().is_execution());
    assert!(serial.open("/nonexistent/ttyX", 9600).unwrap_err().is_execution());
}

#[test]
#[ignore = "waits for the full 10 s default timeout"]
fn test_pty_default_timeout() {
    let env = PtyEnv::new();
    let mut hal = linux_hal(HalConfig::default());
    let mut serial = hal.serial();
    let fd = serial.open(&env.slave_path, 9600).unwrap();

    let started = Instant::now();
    assert_eq!(serial.get_char(fd).unwrap().as_raw(), -1);
    assert!(started.elapsed() >= Duration::from_secs(9));
}
