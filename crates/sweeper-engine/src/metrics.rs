//! Prometheus metrics collection and formatting.
//!
//! Gauges are rendered in the Prometheus text exposition format from the
//! registry's in-memory view, so only the current process's tasks appear.

use std::fmt::Write;

use sweeper_core::TaskProgress;

use crate::limiter::RateLimiterPool;
use crate::registry::TaskRegistry;

/// Collect all metrics and format as Prometheus text.
pub async fn collect_metrics(registry: &TaskRegistry, limiters: &RateLimiterPool) -> String {
    let mut output = String::new();

    collect_registry_metrics(registry, &mut output).await;
    collect_limiter_metrics(limiters, &mut output);

    output
}

async fn collect_registry_metrics(registry: &TaskRegistry, output: &mut String) {
    let stats = registry.stats().await;

    writeln!(
        output,
        "# HELP sweeper_tasks_active Number of running scan tasks"
    )
    .ok();
    writeln!(output, "# TYPE sweeper_tasks_active gauge").ok();
    writeln!(output, "sweeper_tasks_active {}", stats.active_count).ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP sweeper_workspaces_paused Workspaces with live moderation paused"
    )
    .ok();
    writeln!(output, "# TYPE sweeper_workspaces_paused gauge").ok();
    writeln!(output, "sweeper_workspaces_paused {}", stats.paused_count).ok();

    if stats.tasks.is_empty() {
        return;
    }

    let gauges: [(&str, &str, fn(&TaskProgress) -> u64); 5] = [
        ("targets_total", "Targets selected for the task", |p| {
            p.total_targets
        }),
        ("targets_completed", "Targets finished so far", |p| {
            p.completed_targets
        }),
        ("messages_scanned", "Messages inspected so far", |p| {
            p.scanned_messages
        }),
        ("messages_deleted", "Messages deleted so far", |p| {
            p.deleted_messages
        }),
        ("unlock_operations", "Locked threads temporarily opened", |p| {
            p.unlock_operations
        }),
    ];

    for (name, help, value) in gauges {
        writeln!(output).ok();
        writeln!(output, "# HELP sweeper_task_{name} {help}").ok();
        writeln!(output, "# TYPE sweeper_task_{name} gauge").ok();
        for task in &stats.tasks {
            writeln!(
                output,
                "sweeper_task_{name}{{workspace=\"{}\",task=\"{}\",kind=\"{}\"}} {}",
                task.workspace_id,
                task.task_id,
                task.kind,
                value(&task.progress)
            )
            .ok();
        }
    }
}

fn collect_limiter_metrics(limiters: &RateLimiterPool, output: &mut String) {
    writeln!(output).ok();
    writeln!(
        output,
        "# HELP sweeper_rate_limit_queued Operations waiting for a rate limit slot"
    )
    .ok();
    writeln!(output, "# TYPE sweeper_rate_limit_queued gauge").ok();
    writeln!(output, "sweeper_rate_limit_queued {}", limiters.queued()).ok();
}
