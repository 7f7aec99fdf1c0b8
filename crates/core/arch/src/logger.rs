//! Serial console logger
//!
//! Routes the `log` facade to COM1. Each record is one line:
//! `[LEVEL target] message\r\n`.

use core::fmt::{self, Write};

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

use crate::port::{inb, outb};

/// Serial port for log output (COM1)
pub const SERIAL_PORT: u16 = 0x3F8;

/// Line status register: transmit holding register empty
const LSR_THR_EMPTY: u8 = 0x20;

/// Polling writer for a 16550 UART
pub struct SerialPort {
    base: u16,
}

impl SerialPort {
    pub const fn new(base: u16) -> Self {
        SerialPort { base }
    }

    fn write_byte(&mut self, byte: u8) {
        unsafe {
            for _ in 0..10_000 {
                if inb(self.base + 5) & LSR_THR_EMPTY != 0 {
                    break;
                }
            }
            outb(self.base, byte);
        }
    }
}

impl Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
        Ok(())
    }
}

/// Format one record the way it appears on the console
pub fn write_record<W: Write>(out: &mut W, level: Level, target: &str, args: fmt::Arguments) -> fmt::Result {
    write!(out, "[{} {}] ", level, target)?;
    out.write_fmt(args)?;
    out.write_str("\r\n")
}

pub struct SerialLogger {
    port: Mutex<SerialPort>,
}

impl SerialLogger {
    pub const fn new(base: u16) -> Self {
        SerialLogger {
            port: Mutex::new(SerialPort::new(base)),
        }
    }
}

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut port = self.port.lock();
        let _ = write_record(&mut *port, record.level(), record.target(), *record.args());
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger::new(SERIAL_PORT);

/// Install the serial logger; only the first call succeeds
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}
