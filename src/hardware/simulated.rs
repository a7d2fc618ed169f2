//! Simulated board peripherals.
//!
//! Every part is a cheap handle over shared state so the simulated plant
//! (or a test) can observe and drive it while the control loop owns its own
//! clone.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::controller::connectivity::{Connectivity, ConnectivityError};
use crate::domain::{HeartbeatLed, OutputState, RelayOutputs, ResetInput};

/// Hardware receive FIFO size; older bytes are lost on overflow.
const UART_FIFO_BYTES: usize = 4096;

/// Relay and status lamp.
#[derive(Debug, Clone)]
pub struct SimulatedOutputs {
    state: Arc<Mutex<OutputState>>,
    writes: Arc<AtomicU32>,
}

impl SimulatedOutputs {
    /// Outputs as they are before firmware drives them: both off.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(OutputState::OFF)),
            writes: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn state(&self) -> OutputState {
        *self.state.lock()
    }

    pub fn relay_closed(&self) -> bool {
        self.state.lock().relay_enabled
    }

    /// Total output writes, idempotent ones included.
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl Default for SimulatedOutputs {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayOutputs for SimulatedOutputs {
    fn set_relay(&mut self, enabled: bool) {
        self.state.lock().relay_enabled = enabled;
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn set_indicator(&mut self, enabled: bool) {
        self.state.lock().indicator_enabled = enabled;
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Push button; `press`/`release` from the outside world.
#[derive(Debug, Clone, Default)]
pub struct SimulatedButton {
    pressed: Arc<AtomicBool>,
}

impl SimulatedButton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self) {
        self.pressed.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.pressed.store(false, Ordering::SeqCst);
    }
}

impl ResetInput for SimulatedButton {
    fn is_active(&self) -> bool {
        self.pressed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedLed {
    on: Arc<AtomicBool>,
    toggles: Arc<AtomicU32>,
}

impl SimulatedLed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    pub fn toggles(&self) -> u32 {
        self.toggles.load(Ordering::SeqCst)
    }
}

impl HeartbeatLed for SimulatedLed {
    fn set(&mut self, on: bool) {
        if self.on.swap(on, Ordering::SeqCst) != on {
            self.toggles.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Receive side of a UART. Reads never block.
#[derive(Debug, Clone, Default)]
pub struct SimulatedUart {
    fifo: Arc<Mutex<VecDeque<u8>>>,
}

impl SimulatedUart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transmit bytes towards the reader, dropping the oldest on overflow.
    pub fn transmit(&self, bytes: &[u8]) {
        let mut fifo = self.fifo.lock();
        fifo.extend(bytes.iter().copied());
        let excess = fifo.len().saturating_sub(UART_FIFO_BYTES);
        fifo.drain(..excess);
    }

    pub fn pending(&self) -> usize {
        self.fifo.lock().len()
    }
}

impl Read for SimulatedUart {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut fifo = self.fifo.lock();
        if fifo.is_empty() {
            return Err(io::Error::new(ErrorKind::WouldBlock, "uart fifo empty"));
        }
        let n = buf.len().min(fifo.len());
        for (slot, byte) in buf.iter_mut().zip(fifo.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

#[derive(Debug, Default)]
struct LinkState {
    connected: bool,
    /// Whether the access point accepts (re)association
    reachable: bool,
    attempts: u32,
}

/// Network link whose availability is set from the outside.
#[derive(Debug, Clone)]
pub struct SimulatedLink {
    state: Arc<Mutex<LinkState>>,
}

impl SimulatedLink {
    /// Link with a reachable access point, not yet associated.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LinkState {
                connected: false,
                reachable: true,
                attempts: 0,
            })),
        }
    }

    /// Make the access point (un)reachable. Going unreachable drops the link.
    pub fn set_reachable(&self, reachable: bool) {
        let mut state = self.state.lock();
        state.reachable = reachable;
        if !reachable {
            state.connected = false;
        }
    }

    pub fn attempts(&self) -> u32 {
        self.state.lock().attempts
    }

    fn associate(&mut self) -> Result<(), ConnectivityError> {
        let mut state = self.state.lock();
        state.attempts += 1;
        if state.reachable {
            state.connected = true;
            Ok(())
        } else {
            Err(ConnectivityError::Rejected("access point unreachable".into()))
        }
    }
}

impl Default for SimulatedLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Connectivity for SimulatedLink {
    fn begin(&mut self) -> Result<(), ConnectivityError> {
        // Association failure surfaces later as a connect timeout
        let _ = self.associate();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn reconnect(&mut self) -> Result<(), ConnectivityError> {
        self.associate()
    }
}
