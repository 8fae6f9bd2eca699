use sigboard_core::orchestrator::DashboardView;
use sigboard_core::view::ViewMode;
use std::fmt::Write as _;

pub fn print_view(view: &DashboardView) {
    println!("{}", format_view(view));
}

fn format_view(view: &DashboardView) -> String {
    let mut out = String::new();

    let scope = match view.view_mode {
        ViewMode::WatchlistOnly => "watchlist",
        ViewMode::AllMarket => "all market",
    };
    let filters: Vec<String> = view
        .controls
        .iter()
        .map(|c| {
            if c.active {
                format!("[{}]", c.label)
            } else {
                c.label.to_string()
            }
        })
        .collect();

    let _ = writeln!(
        out,
        "== {scope} | total {} | buy {} | sell {} | hold {} | pending {} ==",
        view.counts.total, view.counts.buy, view.counts.sell, view.counts.hold, view.counts.pending
    );
    let _ = write!(out, "filter: {}", filters.join(" "));
    if !view.search.is_empty() {
        let _ = write!(out, "  search: {}", view.search);
    }
    if view.auto_predict_running {
        out.push_str("  (auto-predict running)");
    }
    out.push('\n');

    if let Some(err) = &view.error {
        let _ = writeln!(out, "error: {err}");
        return out;
    }
    if view.loading {
        out.push_str("loading...\n");
        return out;
    }
    if view.rows.is_empty() {
        out.push_str("no recommendations\n");
        return out;
    }

    for row in &view.rows {
        let _ = writeln!(out, "{row}");
    }
    if view.skipped > 0 {
        let _ = writeln!(out, "({} malformed rows hidden)", view.skipped);
    }
    if let Some(at) = view.last_fetched_at {
        let _ = writeln!(out, "updated {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    out
}
