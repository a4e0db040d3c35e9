use std::collections::{HashMap, VecDeque};

/// Ports 0 (input) and 1-7 (output) as a map from port number to a FIFO of byte values, the way
/// the original machine's `IOController` models it: input bytes arrive via the interrupt schedule
/// or a pre-seeded buffer, output bytes accumulate and are drained by the simulator for display.
pub struct IoController {
    ports: HashMap<i32, VecDeque<u8>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum IoError {
    PortEmpty(i32),
    InvalidInputPort(i32),
    InvalidOutputPort(i32),
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::PortEmpty(port) => write!(f, "input port {} is empty", port),
            IoError::InvalidInputPort(port) => write!(f, "IN only supports port 0, got {}", port),
            IoError::InvalidOutputPort(port) => {
                write!(f, "OUT only supports ports 1-7, got {}", port)
            }
        }
    }
}

impl std::error::Error for IoError {}

impl IoController {
    pub fn new() -> IoController {
        let mut ports = HashMap::new();
        for port in 0..=7 {
            ports.insert(port, VecDeque::new());
        }
        IoController { ports }
    }

    /// Pushes a byte into `port`'s FIFO, as the interrupt schedule or an external test harness does.
    pub fn push_input(&mut self, port: i32, value: u8) {
        self.ports.entry(port).or_default().push_back(value);
    }

    /// Pops the next byte from an input port (port 0). Fails with [`IoError::PortEmpty`] if no
    /// byte has arrived yet.
    pub fn input(&mut self, port: i32) -> Result<i32, IoError> {
        if port != crate::constants::IN_PORT {
            return Err(IoError::InvalidInputPort(port));
        }
        self.ports
            .get_mut(&port)
            .and_then(|q| q.pop_front())
            .map(|b| b as i32)
            .ok_or(IoError::PortEmpty(port))
    }

    /// Pushes `chr(value mod 256)` onto an output port (1-7).
    pub fn output(&mut self, port: i32, value: i32) -> Result<(), IoError> {
        if !(crate::constants::OUT_PORT_MIN..=crate::constants::OUT_PORT_MAX).contains(&port) {
            return Err(IoError::InvalidOutputPort(port));
        }
        self.ports
            .entry(port)
            .or_default()
            .push_back((value.rem_euclid(256)) as u8);
        Ok(())
    }

    /// Concatenated byte stream accumulated on `port`, e.g. port 1's contents are the program's
    /// standard output.
    pub fn drained_output(&self, port: i32) -> Vec<u8> {
        self.ports.get(&port).cloned().unwrap_or_default().into()
    }
}

impl Default for IoController {
    fn default() -> Self {
        Self::new()
    }
}
