//! Send plan - how a campaign's timing spreads its recipients over time

use engage_storage::models::Campaign;
use serde::Serialize;
use std::time::Duration;

/// Timing parameters of a campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendTiming {
    pub delay_between_messages: Duration,
    pub batch_size: u32,
    pub delay_between_batches: Duration,
}

/// Batch count and estimated duration for a recipient count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SendPlan {
    pub recipients: u64,
    pub batches: u64,
    #[serde(with = "duration_ms")]
    pub estimated_duration: Duration,
}

/// Where one recipient lands in the plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SendSlot {
    /// One-based
    pub batch_number: u64,
    /// One-based
    pub position_in_batch: u64,
    #[serde(with = "duration_ms")]
    pub offset: Duration,
}

impl SendTiming {
    /// Timing from millisecond delays; a zero batch size counts as one
    pub fn from_millis(delay_between_messages: u64, batch_size: u32, delay_between_batches: u64) -> Self {
        Self {
            delay_between_messages: Duration::from_millis(delay_between_messages),
            batch_size: batch_size.max(1),
            delay_between_batches: Duration::from_millis(delay_between_batches),
        }
    }

    pub fn from_campaign(campaign: &Campaign) -> Self {
        Self::from_millis(
            campaign.delay_between_messages.max(0) as u64,
            campaign.batch_size.max(1) as u32,
            campaign.delay_between_batches.max(0) as u64,
        )
    }

    fn size(&self) -> u64 {
        self.batch_size.max(1) as u64
    }

    pub fn batches(&self, recipients: u64) -> u64 {
        recipients.div_ceil(self.size())
    }

    /// Plan for `recipients`. Messages within a batch are spaced by the
    /// message delay and batches by the batch delay.
    pub fn plan(&self, recipients: u64) -> SendPlan {
        let batches = self.batches(recipients);
        let estimated_duration = if recipients == 0 {
            Duration::ZERO
        } else {
            self.elapsed(recipients - batches, batches - 1)
        };

        SendPlan {
            recipients,
            batches,
            estimated_duration,
        }
    }

    /// Slot of the recipient at zero-based `index`
    pub fn slot(&self, index: u64) -> SendSlot {
        let batch = index / self.size();
        SendSlot {
            batch_number: batch + 1,
            position_in_batch: index % self.size() + 1,
            offset: self.elapsed(index - batch, batch),
        }
    }

    fn elapsed(&self, message_gaps: u64, batch_gaps: u64) -> Duration {
        let millis = (message_gaps as u128 * self.delay_between_messages.as_millis())
            .saturating_add(batch_gaps as u128 * self.delay_between_batches.as_millis());
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

impl Default for SendTiming {
    fn default() -> Self {
        Self::from_millis(1000, 50, 30000)
    }
}

/// `1h 05m 03s`, `4m 10s`, `12s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_timing_plan() {
        let timing = SendTiming::default();
        let plan = timing.plan(120);

        assert_eq!(plan.batches, 3);
        // 117 in-batch gaps of 1s, 2 batch gaps of 30s
        assert_eq!(plan.estimated_duration, Duration::from_secs(117 + 60));
    }

    #[test]
    fn test_empty_plan() {
        let plan = SendTiming::default().plan(0);
        assert_eq!(plan.batches, 0);
        assert_eq!(plan.estimated_duration, Duration::ZERO);
    }

    #[test]
    fn test_single_recipient() {
        let plan = SendTiming::default().plan(1);
        assert_eq!(plan.batches, 1);
        assert_eq!(plan.estimated_duration, Duration::ZERO);
    }

    #[test]
    fn test_slots() {
        let timing = SendTiming::from_millis(1000, 2, 10_000);

        assert_eq!(
            timing.slot(0),
            SendSlot {
                batch_number: 1,
                position_in_batch: 1,
                offset: Duration::ZERO
            }
        );
        assert_eq!(timing.slot(1).offset, Duration::from_secs(1));
        assert_eq!(
            timing.slot(2),
            SendSlot {
                batch_number: 2,
                position_in_batch: 1,
                offset: Duration::from_secs(11)
            }
        );
    }

    #[test]
    fn test_last_slot_ends_the_plan() {
        let timing = SendTiming::from_millis(750, 7, 4_000);
        for recipients in [1u64, 6, 7, 8, 50, 99] {
            let plan = timing.plan(recipients);
            assert_eq!(timing.slot(recipients - 1).offset, plan.estimated_duration);
            assert_eq!(timing.slot(recipients - 1).batch_number, plan.batches);
        }
    }

    #[test]
    fn test_zero_batch_size_counts_as_one() {
        let timing = SendTiming::from_millis(1000, 0, 5000);
        assert_eq!(timing.plan(3).batches, 3);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(12)), "12s");
        assert_eq!(format_duration(Duration::from_secs(250)), "4m 10s");
        assert_eq!(format_duration(Duration::from_secs(3903)), "1h 05m 03s");
    }
}
