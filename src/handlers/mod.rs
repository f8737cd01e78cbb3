//! Front-ends driving a kernel: JSON-lines bus and interactive console.

pub mod console;
pub mod serve;

use tracing::{debug, warn};

use crate::kernel::InterruptHandle;

/// Routes process-level Ctrl-C to the kernel's interrupt handle.
pub fn forward_ctrl_c(handle: InterruptHandle) {
    tokio::spawn(async move {
        loop {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(%err, "cannot listen for Ctrl-C");
                return;
            }
            let delivered = handle.interrupt();
            debug!(delivered, "Ctrl-C forwarded");
            if !delivered {
                return;
            }
        }
    });
}
