//! Human-readable summaries of a run snapshot.

use crate::engine::RunSnapshot;
use crate::outcome::{Metric, Variant};

/// One line per metric in the progress format used by the CLI, e.g. `like: 91.12% Vers. A`.
pub fn render_progress_lines(snapshot: &RunSnapshot) -> Vec<String> {
    snapshot
        .verdicts()
        .iter()
        .map(|v| format!("{}: {}", v.metric.as_str(), v.verdict))
        .collect()
}

pub fn render_summary_markdown(snapshot: &RunSnapshot) -> String {
    let mut out = String::new();
    out.push_str("# Viral Prediction Report\n\n");
    out.push_str(&format!("- Run: `{}`\n", snapshot.run_id()));
    out.push_str(&format!(
        "- Started: {}\n",
        snapshot.started_at().format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!("- Platform: {}\n", snapshot.platform_label()));
    out.push_str(&format!(
        "- Simulated users: {} / {}\n",
        snapshot.trials_completed(),
        snapshot.max_users()
    ));
    out.push_str(&format!("- Batches: {}\n", snapshot.batches_completed()));
    if snapshot.retries() > 0 {
        out.push_str(&format!("- Retried oracle calls: {}\n", snapshot.retries()));
    }
    if snapshot.fallback_samples() > 0 {
        out.push_str(&format!(
            "- Fallback samples: {}\n",
            snapshot.fallback_samples()
        ));
    }
    if snapshot.unparseable_replies() > 0 {
        out.push_str(&format!(
            "- Replies without outcome fields: {}\n",
            snapshot.unparseable_replies()
        ));
    }

    out.push_str("\n## Verdicts\n\n");
    out.push_str("| Metric | A | B | Winner | Confidence |\n");
    out.push_str("|---|---:|---:|:---:|---:|\n");
    for v in snapshot.verdicts() {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {:.2}% |\n",
            v.metric.as_str(),
            v.count_a,
            v.count_b,
            v.verdict.winner,
            v.verdict.confidence_percent
        ));
    }

    if let Some(total) = snapshot.verdict(Metric::Total) {
        out.push_str(&format!(
            "\nOverall engagement: A {} vs B {} ({}).\n",
            snapshot.tally(Variant::A).total(),
            snapshot.tally(Variant::B).total(),
            total.verdict
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RunParams;
    use crate::normalize::ParseSource;
    use crate::outcome::OutcomeSample;
    use crate::sampler::{BatchOutcome, SampleRecord};

    fn rec(sample: OutcomeSample, fell_back: bool) -> SampleRecord {
        SampleRecord {
            sample,
            source: if fell_back {
                ParseSource::Unparseable
            } else {
                ParseSource::Json
            },
            attempts: if fell_back { 3 } else { 1 },
            fell_back,
            invalid_replies: 0,
        }
    }

    #[test]
    fn summary_lists_every_metric() {
        let params = RunParams::new("a", "b", "Reddit").max_users(2);
        let mut snap = RunSnapshot::new(&params);
        snap.record_batch(&BatchOutcome {
            a: vec![
                rec(OutcomeSample::new(1, 0, 0, 0), false),
                rec(OutcomeSample::new(1, 0, 0, 0), false),
            ],
            b: vec![
                rec(OutcomeSample::ZERO, false),
                rec(OutcomeSample::ZERO, true),
            ],
        });

        let md = render_summary_markdown(&snap);
        assert!(md.contains("- Platform: Reddit"));
        assert!(md.contains("- Simulated users: 2 / 2"));
        assert!(md.contains("- Fallback samples: 1"));
        assert!(md.contains("| like | 2 | 0 | A | 100.00% |"));
        assert!(md.contains("| comment | 0 | 0 | - | 0.00% |"));
        assert!(md.contains("| total | 2 | 0 | A | 100.00% |"));
        assert!(md.contains("Overall engagement: A 2 vs B 0 (100.00% Vers. A)."));
    }

    #[test]
    fn progress_lines_follow_metric_order() {
        let snap = RunSnapshot::new(&RunParams::new("a", "b", "Reddit"));
        let lines = render_progress_lines(&snap);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "like: 0.00% Vers. -");
        assert_eq!(lines[4], "total: 0.00% Vers. -");
    }
}
