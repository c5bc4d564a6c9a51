//! Sequential, throttled group membership adds.
//!
//! One add request in flight at a time, and a fixed pause after every attempt whether it
//! succeeded or not. Failures never abort the run; they are counted.

use crate::client::{ParticipantAction, WaClient};
use crate::jid;
use std::time::Duration;

/// Per-run outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkAddReport {
    pub attempted: usize,
    pub added: usize,
    pub failed: usize,
}

/// Add each number to `group` as a user JID, waiting `delay` after every attempt.
pub async fn add_all(
    client: &dyn WaClient,
    group: &str,
    numbers: &[String],
    delay: Duration,
) -> BulkAddReport {
    let mut report = BulkAddReport::default();
    for number in numbers {
        let target = [jid::user_jid(number)];
        report.attempted += 1;
        match client
            .group_participants_update(group, &target, ParticipantAction::Add)
            .await
        {
            Ok(()) => report.added += 1,
            Err(e) => {
                report.failed += 1;
                log::debug!("addall: adding {} to {} failed: {}", number, group, e);
            }
        }
        tokio::time::sleep(delay).await;
    }
    report
}
