//! RS-485 direction control
//!
//! Half-duplex transceivers need their driver enabled while the server
//! transmits and released as soon as the last stop bit has left the wire.
//! [`DirectionController`] owns that output and only touches it when the
//! requested direction differs from the current one.

use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ModbusResult;

/// Longest accepted transmitter settle time
pub const MAX_SETTLE_TIME: Duration = Duration::from_millis(1);

/// Digital output driving the transceiver's DE/RE pins
pub trait DirectionPin {
    /// Drive the output high (`true`) or low (`false`)
    fn set_level(&mut self, high: bool) -> ModbusResult<()>;
}

impl<P: DirectionPin + ?Sized> DirectionPin for Box<P> {
    fn set_level(&mut self, high: bool) -> ModbusResult<()> {
        (**self).set_level(high)
    }
}

/// Bus direction as seen from this server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Receiving,
    Transmitting,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Receiving => write!(f, "RX"),
            Direction::Transmitting => write!(f, "TX"),
        }
    }
}

/// Owner of the optional direction-control output
pub struct DirectionController {
    pin: Option<Box<dyn DirectionPin + Send>>,
    /// Level that enables the transmitter
    transmit_level: bool,
    /// Delay after switching to transmit before the first byte goes out
    settle_time: Duration,
    /// `None` until the line has been driven once
    state: Option<Direction>,
}

impl fmt::Debug for DirectionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectionController")
            .field("has_pin", &self.pin.is_some())
            .field("transmit_level", &self.transmit_level)
            .field("settle_time", &self.settle_time)
            .field("state", &self.state)
            .finish()
    }
}

impl Default for DirectionController {
    fn default() -> Self {
        Self::none()
    }
}

impl DirectionController {
    /// Controller without an output; transitions only track state
    pub fn none() -> Self {
        Self {
            pin: None,
            transmit_level: true,
            settle_time: Duration::ZERO,
            state: None,
        }
    }

    /// Controller driving `pin`, high while transmitting
    pub fn new<P>(pin: P) -> Self
    where
        P: DirectionPin + Send + 'static,
    {
        Self {
            pin: Some(Box::new(pin)),
            ..Self::none()
        }
    }

    /// Set the level that enables the transmitter (default high)
    pub fn with_transmit_level(mut self, high: bool) -> Self {
        self.transmit_level = high;
        self
    }

    /// Wait this long after enabling the transmitter.
    ///
    /// The wait blocks the calling thread, including the runtime thread
    /// driving `ModbusRtuServer::run`. Values above [`MAX_SETTLE_TIME`] are
    /// clamped; transceivers need a few microseconds here.
    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        if settle_time > MAX_SETTLE_TIME {
            warn!(
                "Settle time {:?} exceeds {:?}; clamped",
                settle_time, MAX_SETTLE_TIME
            );
        }
        self.settle_time = settle_time.min(MAX_SETTLE_TIME);
        self
    }

    pub fn settle_time(&self) -> Duration {
        self.settle_time
    }

    pub fn has_pin(&self) -> bool {
        self.pin.is_some()
    }

    /// Current direction; receiving until the first transmit
    pub fn state(&self) -> Direction {
        self.state.unwrap_or(Direction::Receiving)
    }

    pub fn is_transmitting(&self) -> bool {
        self.state == Some(Direction::Transmitting)
    }

    /// Enable the transmitter. No I/O if already transmitting.
    pub fn assert_transmit(&mut self) -> ModbusResult<()> {
        if self.state == Some(Direction::Transmitting) {
            return Ok(());
        }
        self.drive(Direction::Transmitting)?;
        if !self.settle_time.is_zero() && self.pin.is_some() {
            std::thread::sleep(self.settle_time);
        }
        Ok(())
    }

    /// Release the bus. No I/O if already receiving.
    pub fn assert_receive(&mut self) -> ModbusResult<()> {
        if self.state == Some(Direction::Receiving) {
            return Ok(());
        }
        self.drive(Direction::Receiving)
    }

    fn drive(&mut self, direction: Direction) -> ModbusResult<()> {
        if let Some(pin) = self.pin.as_mut() {
            let level = match direction {
                Direction::Transmitting => self.transmit_level,
                Direction::Receiving => !self.transmit_level,
            };
            if let Err(e) = pin.set_level(level) {
                warn!("Failed to drive direction pin to {}: {}", direction, e);
                // Unknown line level; force the next call to drive it again
                self.state = None;
                return Err(e);
            }
            debug!(
                "Set flow pin {} ({})",
                if level { "HIGH" } else { "LOW" },
                direction
            );
        }
        self.state = Some(direction);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModbusError;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingPin {
        levels: Arc<Mutex<Vec<bool>>>,
    }

    impl DirectionPin for RecordingPin {
        fn set_level(&mut self, high: bool) -> ModbusResult<()> {
            self.levels.lock().unwrap().push(high);
            Ok(())
        }
    }

    struct FailingPin;

    impl DirectionPin for FailingPin {
        fn set_level(&mut self, _high: bool) -> ModbusResult<()> {
            Err(ModbusError::io("gpio unavailable"))
        }
    }

    #[test]
    fn test_transitions_are_idempotent() {
        let pin = RecordingPin::default();
        let levels = Arc::clone(&pin.levels);
        let mut controller = DirectionController::new(pin);

        controller.assert_receive().unwrap();
        controller.assert_receive().unwrap();
        controller.assert_transmit().unwrap();
        controller.assert_transmit().unwrap();
        controller.assert_receive().unwrap();

        assert_eq!(*levels.lock().unwrap(), vec![false, true, false]);
        assert_eq!(controller.state(), Direction::Receiving);
    }

    #[test]
    fn test_inverted_polarity() {
        let pin = RecordingPin::default();
        let levels = Arc::clone(&pin.levels);
        let mut controller = DirectionController::new(pin).with_transmit_level(false);

        controller.assert_transmit().unwrap();
        controller.assert_receive().unwrap();

        assert_eq!(*levels.lock().unwrap(), vec![false, true]);
    }

    #[test]
    fn test_without_pin_tracks_state() {
        let mut controller = DirectionController::none();
        assert!(!controller.has_pin());
        assert_eq!(controller.state(), Direction::Receiving);

        controller.assert_transmit().unwrap();
        assert!(controller.is_transmitting());
        controller.assert_receive().unwrap();
        assert!(!controller.is_transmitting());
    }

    #[test]
    fn test_settle_time_is_capped_and_waited_once() {
        let pin = RecordingPin::default();
        let levels = Arc::clone(&pin.levels);
        let mut controller =
            DirectionController::new(pin).with_settle_time(Duration::from_millis(50));
        assert_eq!(controller.settle_time(), MAX_SETTLE_TIME);

        let started = std::time::Instant::now();
        controller.assert_transmit().unwrap();
        assert!(started.elapsed() >= MAX_SETTLE_TIME);

        // Already transmitting: no pin change
        controller.assert_transmit().unwrap();
        assert_eq!(*levels.lock().unwrap(), vec![true]);

        let short = DirectionController::none().with_settle_time(Duration::from_micros(20));
        assert_eq!(short.settle_time(), Duration::from_micros(20));
    }

    #[test]
    fn test_pin_failure_is_reported_and_retried() {
        let mut controller = DirectionController::new(FailingPin);
        assert!(controller.assert_transmit().is_err());
        assert!(!controller.is_transmitting());
        // State unknown, so the next call drives the pin again
        assert!(controller.assert_receive().is_err());
    }
}
