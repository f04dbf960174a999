use crate::error::TransferStall;
use crate::signal::StopSignal;
use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Filesystem queries the settle loop needs.
pub trait FileProbe: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    fn size(&self, path: &Path) -> io::Result<u64>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiskProbe;

impl FileProbe for DiskProbe {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        fs::metadata(path).map(|m| m.len())
    }
}

/// Waits for a transfer to finish: first for the path to appear, then for
/// two consecutive size samples to agree.
#[derive(Debug, Clone)]
pub struct Settler {
    interval: Duration,
    appear_timeout: Duration,
    stabilize_timeout: Duration,
    stop: StopSignal,
}

impl Settler {
    pub fn new(
        interval: Duration,
        appear_timeout: Duration,
        stabilize_timeout: Duration,
        stop: StopSignal,
    ) -> Self {
        Self {
            interval,
            appear_timeout,
            stabilize_timeout,
            stop,
        }
    }

    /// Returns the settled size.
    pub fn settle(&self, probe: &dyn FileProbe, path: &Path) -> Result<u64, TransferStall> {
        self.wait_for_path(probe, path)?;
        self.wait_for_stable_size(probe, path)
    }

    pub fn wait_for_path(&self, probe: &dyn FileProbe, path: &Path) -> Result<(), TransferStall> {
        let start = Instant::now();
        let mut announced = false;

        while !probe.exists(path) {
            if start.elapsed() >= self.appear_timeout {
                return Err(TransferStall::NeverAppeared {
                    path: path.to_path_buf(),
                    waited: start.elapsed(),
                });
            }
            if !announced {
                info!("Waiting for the final file: {}", path.display());
                announced = true;
            }
            if self.stop.wait_timeout(self.interval) {
                return Err(TransferStall::Cancelled {
                    path: path.to_path_buf(),
                });
            }
        }
        Ok(())
    }

    pub fn wait_for_stable_size(
        &self,
        probe: &dyn FileProbe,
        path: &Path,
    ) -> Result<u64, TransferStall> {
        let start = Instant::now();
        let mut previous = self.sample(probe, path)?;

        loop {
            if self.stop.wait_timeout(self.interval) {
                return Err(TransferStall::Cancelled {
                    path: path.to_path_buf(),
                });
            }

            let current = self.sample(probe, path)?;
            if current == previous {
                debug!("{} settled at {} bytes", path.display(), current);
                return Ok(current);
            }
            trace!("{} grew {} -> {}", path.display(), previous, current);

            if start.elapsed() >= self.stabilize_timeout {
                return Err(TransferStall::NeverSettled {
                    path: path.to_path_buf(),
                    waited: start.elapsed(),
                });
            }
            previous = current;
        }
    }

    fn sample(&self, probe: &dyn FileProbe, path: &Path) -> Result<u64, TransferStall> {
        probe.size(path).map_err(|_| TransferStall::Vanished {
            path: path.to_path_buf(),
        })
    }
}
