use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, HarnessResult};

/// Evaluated before every batch an insert worker writes.
pub const WORKLOAD_BEFORE_INSERT_BATCH: &str = "workload.before_insert_batch";

/// Evaluated before every fault action is sent to the control channel.
pub const FAULT_BEFORE_ACTION: &str = "fault.before_action";

/// Returns an error when the named failpoint is configured with `return`.
///
/// The optional parameter picks the kind: `write`, `connection` or `control`. Anything else
/// yields [`ErrorKind::FailpointTriggered`].
pub fn harness_fail_point(name: &str) -> HarnessResult<()> {
    fail_point!(name, |parameter| {
        let kind = match parameter.as_deref() {
            Some("write") => ErrorKind::WriteError,
            Some("connection") => ErrorKind::ConnectionError,
            Some("control") => ErrorKind::FaultControlError,
            _ => ErrorKind::FailpointTriggered,
        };

        bail!(
            kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
