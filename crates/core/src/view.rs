use crate::api::Scope;
use crate::domain::{PredictionState, RecommendationRecord, Signal};
use serde::{Deserialize, Serialize};

/// Resolved records per category in the all-market summary.
pub const SUMMARY_PER_CATEGORY: usize = 5;

// Above this many records the summary drops pending rows entirely.
const SUMMARY_LARGE_DATASET: usize = SUMMARY_PER_CATEGORY * Signal::ALL.len();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    #[default]
    WatchlistOnly,
    AllMarket,
}

impl ViewMode {
    pub fn scope(self) -> Scope {
        match self {
            ViewMode::WatchlistOnly => Scope::Watchlist,
            ViewMode::AllMarket => Scope::All,
        }
    }
}

/// A record selected for display, tagged with its classification and normalized signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayRecord<'a> {
    pub record: &'a RecommendationRecord,
    pub state: PredictionState,
    pub signal: Option<Signal>,
}

impl<'a> DisplayRecord<'a> {
    pub fn new(record: &'a RecommendationRecord) -> Self {
        Self {
            record,
            state: record.state(),
            signal: record.signal(),
        }
    }
}

/// Selects the rows to show for the current view mode and filter.
///
/// - all-market, no filter: category-balanced summary (first [`SUMMARY_PER_CATEGORY`]
///   resolved records per signal, Buy then Sell then Hold; pending rows follow in data order
///   unless the dataset is large)
/// - any filter: every record whose normalized signal matches, pending or not
/// - watchlist, no filter: everything in data order
pub fn project<'a>(
    records: &'a [RecommendationRecord],
    mode: ViewMode,
    filter: Option<Signal>,
) -> Vec<DisplayRecord<'a>> {
    let tagged = records.iter().map(DisplayRecord::new);

    match (mode, filter) {
        (ViewMode::AllMarket, None) => summarize(tagged.collect(), records.len()),
        (_, Some(signal)) => tagged.filter(|d| d.signal == Some(signal)).collect(),
        (ViewMode::WatchlistOnly, None) => tagged.collect(),
    }
}

fn summarize(tagged: Vec<DisplayRecord<'_>>, total: usize) -> Vec<DisplayRecord<'_>> {
    let mut out = Vec::with_capacity(SUMMARY_LARGE_DATASET);
    for category in Signal::ALL {
        out.extend(
            tagged
                .iter()
                .filter(|d| d.state == PredictionState::Resolved && d.signal == Some(category))
                .take(SUMMARY_PER_CATEGORY)
                .copied(),
        );
    }

    if total <= SUMMARY_LARGE_DATASET {
        out.extend(
            tagged
                .iter()
                .filter(|d| d.state == PredictionState::Pending)
                .copied(),
        );
    }
    out
}

/// Free-text symbol search applied on top of a projection.
pub fn apply_search<'a>(rows: Vec<DisplayRecord<'a>>, query: &str) -> Vec<DisplayRecord<'a>> {
    let needle = query.trim().to_ascii_uppercase();
    if needle.is_empty() {
        return rows;
    }
    rows.into_iter()
        .filter(|d| d.record.symbol.to_ascii_uppercase().contains(&needle))
        .collect()
}
