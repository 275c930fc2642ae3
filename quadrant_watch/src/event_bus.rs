//! Outbound fan-out of engine events.
//!
//! Two broadcast channels: one carries every comparison result, the other the
//! report entry each result updated. Subscribers that fall behind lose the
//! oldest events (`RecvError::Lagged`); the engine never waits on them.

use crate::core_modules::region_tracker::ComparisonResult;
use crate::core_modules::session_report::ReportEntry;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct ActivityBus {
    comparisons_tx: broadcast::Sender<ComparisonResult>,
    report_tx: broadcast::Sender<ReportEntry>,
}

impl ActivityBus {
    pub fn new(capacity: usize) -> Self {
        let (comparisons_tx, _) = broadcast::channel::<ComparisonResult>(capacity.max(1));
        let (report_tx, _) = broadcast::channel::<ReportEntry>(capacity.max(1));
        Self {
            comparisons_tx,
            report_tx,
        }
    }

    pub fn subscribe_comparisons(&self) -> broadcast::Receiver<ComparisonResult> {
        self.comparisons_tx.subscribe()
    }

    pub fn subscribe_report_updates(&self) -> broadcast::Receiver<ReportEntry> {
        self.report_tx.subscribe()
    }

    pub fn has_report_subscribers(&self) -> bool {
        self.report_tx.receiver_count() > 0
    }

    // A send error only means nobody is listening right now.
    pub fn publish_comparison(&self, result: ComparisonResult) {
        let _ = self.comparisons_tx.send(result);
    }

    pub fn publish_report_update(&self, entry: ReportEntry) {
        let _ = self.report_tx.send(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tokio::sync::broadcast::error::RecvError;

    fn result(change_percent: f64) -> ComparisonResult {
        ComparisonResult {
            region: "A".to_string(),
            timestamp: NaiveDate::from_ymd_opt(2024, 3, 4)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            change_percent,
            has_activity: true,
            is_first_capture: false,
        }
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_harmless() {
        let bus = ActivityBus::new(4);
        bus.publish_comparison(result(1.0));
        assert!(!bus.has_report_subscribers());
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_old_events() {
        let bus = ActivityBus::new(2);
        let mut rx = bus.subscribe_comparisons();
        for i in 0..5 {
            bus.publish_comparison(result(i as f64));
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        assert_eq!(rx.recv().await.unwrap().change_percent, 3.0);
        assert_eq!(rx.recv().await.unwrap().change_percent, 4.0);
    }
}
