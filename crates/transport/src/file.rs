//! Write-only port over a host device file, used to stream firmware to
//! serial-attached targets.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::{Port, PortError, PortReader, PortState};

/// A device node opened for writing.
#[derive(Debug)]
pub struct DeviceFilePort {
    file: File,
    path: PathBuf,
    state: Arc<PortState>,
}

impl DeviceFilePort {
    /// Open `path` for writing (the node must already exist).
    pub fn open(path: &Path) -> Result<Self, PortError> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| PortError::ConnectionFailed {
                addr: path.display().to_string(),
                source: e,
            })?;
        log::info!("opened device file {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
            state: PortState::new_open(),
        })
    }
}

impl Port for DeviceFilePort {
    fn write(&mut self, data: &[u8]) -> Result<(), PortError> {
        self.state.check_open()?;
        self.file.write_all(data).map_err(PortError::WriteFailed)?;
        self.file.flush().map_err(PortError::WriteFailed)
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, PortError> {
        self.state.check_open()?;
        Err(PortError::TryAgain)
    }

    fn reader(&self) -> Result<Box<dyn PortReader>, PortError> {
        self.state.check_open()?;
        Ok(Box::new(SilentReader {
            state: Arc::clone(&self.state),
        }))
    }

    fn close(&mut self, loss_expected: bool) {
        self.state.mark_closed(loss_expected);
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }

    fn describe(&self) -> String {
        format!("device file {}", self.path.display())
    }
}

/// Device files never talk back.
struct SilentReader {
    state: Arc<PortState>,
}

impl PortReader for SilentReader {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, PortError> {
        self.state.check_open()?;
        std::thread::sleep(Duration::from_millis(50));
        Err(PortError::TryAgain)
    }

    fn loss_expected(&self) -> bool {
        self.state.loss_expected()
    }
}
