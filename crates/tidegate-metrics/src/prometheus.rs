//! Prometheus text exposition format.

use std::fmt::Write;

use crate::snapshot::AdminMetrics;

fn header(out: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP tidegate_{name} {help}");
    let _ = writeln!(out, "# TYPE tidegate_{name} {kind}");
}

fn sample(out: &mut String, name: &str, labels: &str, value: u64) {
    if labels.is_empty() {
        let _ = writeln!(out, "tidegate_{name} {value}");
    } else {
        let _ = writeln!(out, "tidegate_{name}{{{labels}}} {value}");
    }
}

/// Render an [`AdminMetrics`] snapshot into Prometheus text format.
pub fn render_prometheus(metrics: &AdminMetrics) -> String {
    let mut out = String::new();

    header(&mut out, "domain_version", "gauge", "Checksum version of each configuration domain.");
    for d in &metrics.domains {
        sample(&mut out, "domain_version", &format!("domain=\"{}\"", d.domain), d.version);
    }

    header(
        &mut out,
        "peer_divergence",
        "gauge",
        "Consecutive polls in which a peer's checksum differed from ours.",
    );
    for peer in &metrics.peers {
        for d in &peer.domains {
            sample(
                &mut out,
                "peer_divergence",
                &format!("peer=\"{}\",domain=\"{}\"", peer.address, d.domain),
                u64::from(d.diff_count),
            );
        }
    }

    header(&mut out, "scheduler_active_jobs", "gauge", "Active scheduler jobs.");
    sample(&mut out, "scheduler_active_jobs", "", metrics.active_jobs as u64);

    header(
        &mut out,
        "scheduler_job_last_run_ms",
        "gauge",
        "Epoch milliseconds of each job's last launch (0 if never).",
    );
    for job in &metrics.jobs {
        sample(&mut out, "scheduler_job_last_run_ms", &format!("job=\"{}\"", job.id), job.last_run_ts);
    }

    let e = &metrics.engine;
    let engine = [
        ("engine_loads_total", "Domain loads into runtime.", e.loads),
        ("engine_saves_total", "Domain saves from runtime.", e.saves),
        ("engine_saves_skipped_total", "Saves skipped to protect non-empty disk tables.", e.saves_skipped),
        ("engine_save_failures_total", "Failed disk or mirror transactions.", e.save_failures),
        ("engine_rows_skipped_total", "Rows rejected during load.", e.rows_skipped),
        ("engine_remote_applies_total", "Peer snapshots applied.", e.remote_applies),
        ("engine_remote_rejections_total", "Peer snapshots rejected.", e.remote_rejections),
    ];
    let s = &metrics.scheduler;
    let scheduler = [
        ("scheduler_ticks_total", "Scheduler ticks.", s.ticks),
        ("scheduler_launches_total", "Job launches.", s.launches),
        ("scheduler_launch_failures_total", "Job launches that failed to spawn.", s.launch_failures),
        ("scheduler_rejected_jobs_total", "Job rows rejected at install.", s.rejected_jobs),
    ];
    for (name, help, value) in engine.into_iter().chain(scheduler) {
        header(&mut out, name, "counter", help);
        sample(&mut out, name, "", value);
    }

    if let Some(c) = &metrics.cluster {
        let cluster = [
            ("cluster_polls_total", "Checksum polls.", c.polls),
            ("cluster_peer_failures_total", "Peer checksum queries that failed.", c.peer_failures),
            ("cluster_pulls_total", "Snapshot pulls attempted.", c.pulls),
            ("cluster_pulls_applied_total", "Snapshot pulls applied.", c.pulls_applied),
            ("cluster_pull_failures_total", "Snapshot pulls that failed.", c.pull_failures),
            ("cluster_payload_rejections_total", "Snapshots rejected as invalid.", c.payload_rejections),
        ];
        for (name, help, value) in cluster {
            header(&mut out, name, "counter", help);
            sample(&mut out, name, "", value);
        }
    }

    out
}
