//! In-memory UART line.
//!
//! One clone goes to the frame source as its [`SerialPort`]; the test or
//! bench harness keeps another to push sensor bytes and inspect what
//! the firmware wrote.

use core::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::SensorError;
use crate::sensors::transport::SerialPort;

#[derive(Default)]
struct Line {
    rx: VecDeque<u8>,
    tx: Vec<Vec<u8>>,
    discards: u32,
    broken: bool,
}

#[derive(Clone, Default)]
pub struct SimSerial {
    line: Rc<RefCell<Line>>,
}

impl SimSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes as if the sensor had sent them.
    pub fn push_rx(&self, bytes: &[u8]) {
        self.line.borrow_mut().rx.extend(bytes.iter().copied());
    }

    pub fn pending_rx(&self) -> usize {
        self.line.borrow().rx.len()
    }

    /// Every `write` call the firmware made, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.line.borrow().tx.clone()
    }

    /// Number of `discard_input` calls (one per resync).
    pub fn discards(&self) -> u32 {
        self.line.borrow().discards
    }

    /// Make every subsequent read and write fail with a bus error.
    pub fn set_broken(&self, broken: bool) {
        self.line.borrow_mut().broken = broken;
    }
}

impl SerialPort for SimSerial {
    fn available(&mut self) -> usize {
        self.line.borrow().rx.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SensorError> {
        let mut line = self.line.borrow_mut();
        if line.broken {
            return Err(SensorError::Bus);
        }
        let n = buf.len().min(line.rx.len());
        for (slot, byte) in buf.iter_mut().zip(line.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, SensorError> {
        let mut line = self.line.borrow_mut();
        if line.broken {
            return Err(SensorError::Bus);
        }
        line.tx.push(data.to_vec());
        Ok(data.len())
    }

    fn discard_input(&mut self) {
        let mut line = self.line.borrow_mut();
        line.rx.clear();
        line.discards += 1;
    }
}
