use crate::domain::{PredictionState, RecommendationRecord, Signal};
use serde::Serialize;

/// KPI tiles. Always computed over the full record set, never over a projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub total: usize,
    pub buy: usize,
    pub sell: usize,
    pub hold: usize,
    pub pending: usize,
}

pub fn compute_counts(records: &[RecommendationRecord]) -> Counts {
    let mut counts = Counts {
        total: records.len(),
        ..Counts::default()
    };

    for record in records {
        if record.state() == PredictionState::Pending {
            counts.pending += 1;
            continue;
        }
        match record.signal() {
            Some(Signal::Buy) => counts.buy += 1,
            Some(Signal::Sell) => counts.sell += 1,
            Some(Signal::Hold) => counts.hold += 1,
            None => {}
        }
    }
    counts
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterControl {
    /// `None` is the "All" control.
    pub filter: Option<Signal>,
    pub label: &'static str,
    pub active: bool,
}

/// Filter buttons; exactly one is active at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterControls {
    controls: Vec<FilterControl>,
}

impl Default for FilterControls {
    fn default() -> Self {
        let mut controls = vec![FilterControl {
            filter: None,
            label: "ALL",
            active: true,
        }];
        controls.extend(Signal::ALL.iter().map(|s| FilterControl {
            filter: Some(*s),
            label: s.as_str(),
            active: false,
        }));
        Self { controls }
    }
}

impl FilterControls {
    pub fn sync(&mut self, active_filter: Option<Signal>) {
        for control in &mut self.controls {
            control.active = control.filter == active_filter;
        }
    }

    pub fn active(&self) -> Option<&FilterControl> {
        self.controls.iter().find(|c| c.active)
    }

    pub fn controls(&self) -> &[FilterControl] {
        &self.controls
    }
}
