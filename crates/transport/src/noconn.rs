//! A port that is connected to nothing.

use std::sync::Arc;
use std::time::Duration;

use crate::{Port, PortError, PortReader, PortState};

/// Discards writes; reads idle for one poll interval and report `TryAgain`.
///
/// Lets a session run (scripts, offline decoding) without a target.
pub struct NoConnPort {
    state: Arc<PortState>,
    poll: Duration,
}

impl NoConnPort {
    /// A new open no-op port.
    pub fn new(poll: Duration) -> Self {
        Self {
            state: PortState::new_open(),
            poll,
        }
    }
}

impl Port for NoConnPort {
    fn write(&mut self, data: &[u8]) -> Result<(), PortError> {
        self.state.check_open()?;
        log::debug!("noconn discarding {} bytes", data.len());
        Ok(())
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, PortError> {
        idle(&self.state, self.poll)
    }

    fn reader(&self) -> Result<Box<dyn PortReader>, PortError> {
        self.state.check_open()?;
        Ok(Box::new(NoConnReader {
            state: Arc::clone(&self.state),
            poll: self.poll,
        }))
    }

    fn close(&mut self, loss_expected: bool) {
        self.state.mark_closed(loss_expected);
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }

    fn describe(&self) -> String {
        "no connection".to_string()
    }
}

struct NoConnReader {
    state: Arc<PortState>,
    poll: Duration,
}

impl PortReader for NoConnReader {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, PortError> {
        idle(&self.state, self.poll)
    }

    fn loss_expected(&self) -> bool {
        self.state.loss_expected()
    }
}

fn idle(state: &PortState, poll: Duration) -> Result<usize, PortError> {
    state.check_open()?;
    std::thread::sleep(poll);
    state.check_open()?;
    Err(PortError::TryAgain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServiceClass;

    #[test]
    fn writes_are_discarded_until_closed() {
        let mut port = NoConnPort::new(Duration::from_millis(1));
        assert!(port.write(b"fm.go\n").is_ok());
        port.close(true);
        assert!(matches!(port.write(b"fm.go\n"), Err(PortError::PortClosed)));
    }

    #[test]
    fn reads_idle_then_fail_after_close() {
        let mut port = NoConnPort::new(Duration::from_millis(1));
        let mut reader = port.reader().unwrap();
        let mut buf = [0u8; 8];
        assert!(matches!(reader.read(&mut buf), Err(PortError::TryAgain)));
        port.close(true);
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.class(), ServiceClass::LostService);
        assert!(reader.loss_expected());
        assert!(port.reader().is_err());
    }
}
