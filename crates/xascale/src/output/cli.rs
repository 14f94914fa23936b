use cli_table::format::{Justify, Separator};
use cli_table::{Cell, CellStruct, Color, ColorChoice, Style, Table, TableStruct, print_stdout};

use anyhow::Error;
use chrono::{DateTime, Local, Utc};
use std::fmt::Display;
use colored::Color as Colorization;
use colored::Colorize;

use xacore::allocator::{AllocationPlan, PlanEntry};
use xacore::config::{Concurrency, RunSpec};
use xacore::report::{RunReport, Verdict, WorkloadResult, WorkloadStatus};
use xacore::topology::Topology;
use xacore::workload::WorkloadRegistry;

use crate::common::format::{format_optional_duration, format_std_duration, human_duration};
use crate::output::outputs::Output;

pub const STATUS_COLOR_PASSED: Colorization = Colorization::Green;
pub const STATUS_COLOR_FAILED: Colorization = Colorization::Red;
pub const STATUS_COLOR_TIMED_OUT: Colorization = Colorization::Magenta;
pub const STATUS_COLOR_SKIPPED: Colorization = Colorization::Yellow;

pub struct CliOutput {
    color_policy: ColorChoice,
}

impl CliOutput {
    pub fn new(color_policy: ColorChoice) -> CliOutput {
        CliOutput { color_policy }
    }

    fn print_vertical_table(&self, rows: Vec<Vec<CellStruct>>) {
        let table = rows.table().separator(
            Separator::builder()
                .column(Some(Default::default()))
                .build(),
        );
        self.print_table(table);
    }

    fn print_horizontal_table(&self, rows: Vec<Vec<CellStruct>>, header: Vec<CellStruct>) {
        let table = rows
            .table()
            .separator(
                Separator::builder()
                    .title(Some(Default::default()))
                    .column(Some(Default::default()))
                    .build(),
            )
            .title(header);
        self.print_table(table);
    }

    fn print_table(&self, table: TableStruct) {
        let table = table.color_choice(self.color_policy);
        if let Err(e) = print_stdout(table) {
            log::error!("Cannot print table to stdout: {e:?}");
        }
    }
}

impl Output for CliOutput {
    fn print_workload_list(&self, registry: &WorkloadRegistry, topology: &Topology) {
        let rows: Vec<_> = registry
            .list_all()
            .iter()
            .map(|definition| {
                vec![
                    definition.name().cell().bold(true),
                    definition.requirement().to_string().cell(),
                    format_std_duration(definition.default_duration()).cell(),
                    definition.description().cell(),
                ]
            })
            .collect();
        let header = vec![
            "Workload".cell().bold(true),
            "Resources".cell().bold(true),
            "Default duration".cell().bold(true),
            "Description".cell().bold(true),
        ];
        self.print_horizontal_table(rows, header);

        let rows: Vec<_> = topology
            .nodes()
            .iter()
            .map(|node| {
                let mut kinds: Vec<(&str, usize)> = Vec::new();
                for id in &node.units {
                    let kind = topology.unit(*id).kind.as_str();
                    match kinds.iter_mut().find(|(k, _)| *k == kind) {
                        Some((_, count)) => *count += 1,
                        None => kinds.push((kind, 1)),
                    }
                }
                let resources = kinds
                    .iter()
                    .map(|(kind, count)| format!("{count}x {kind}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                vec![node.name.as_str().cell().bold(true), resources.cell()]
            })
            .collect();
        let header = vec!["Node".cell().bold(true), "Resources".cell().bold(true)];
        self.print_horizontal_table(rows, header);
    }

    fn print_run_spec(&self, spec: &RunSpec) {
        let rows = vec![
            vec![
                "Name".cell().bold(true),
                spec.name.as_deref().unwrap_or("").cell(),
            ],
            vec![
                "Workloads".cell().bold(true),
                spec.workloads.join("\n").cell(),
            ],
            vec![
                "Excluded".cell().bold(true),
                spec.exclude
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
                    .cell(),
            ],
            vec![
                "Duration".cell().bold(true),
                format_optional_duration(spec.duration, "workload default").cell(),
            ],
            vec![
                "Timeout".cell().bold(true),
                format_std_duration(spec.timeout).cell(),
            ],
            vec![
                "Run timeout".cell().bold(true),
                format_optional_duration(spec.run_timeout, "none").cell(),
            ],
            vec![
                "Repeat".cell().bold(true),
                spec.repeat.cell().justify(Justify::Left),
            ],
            vec![
                "Seed".cell().bold(true),
                spec.seed.cell().justify(Justify::Left),
            ],
            vec![
                "Concurrency".cell().bold(true),
                match spec.concurrency {
                    Concurrency::Unbounded => "unbounded".to_string(),
                    Concurrency::Limited(n) => n.to_string(),
                }
                .cell(),
            ],
            vec!["Strict".cell().bold(true), spec.strict.cell()],
            vec!["Maximize".cell().bold(true), spec.maximize.cell()],
            vec![
                "Sharing groups".cell().bold(true),
                spec.sharing_groups
                    .iter()
                    .map(|group| {
                        let members: Vec<_> = group.workloads.iter().map(|s| s.as_str()).collect();
                        format!("{}: {}", group.name, members.join(", "))
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
                    .cell(),
            ],
            vec![
                "Nodes".cell().bold(true),
                if spec.nodes.is_empty() {
                    "all".to_string()
                } else {
                    spec.nodes.join(", ")
                }
                .cell(),
            ],
        ];
        self.print_vertical_table(rows);
    }

    fn print_plan(&self, spec: &RunSpec, plan: &AllocationPlan, topology: &Topology) {
        let rows: Vec<_> = plan
            .entries()
            .iter()
            .map(|entry| match entry {
                PlanEntry::Allocated(allocation) => vec![
                    allocation.instance.cell().justify(Justify::Right),
                    allocation.workload.as_str().cell().bold(true),
                    allocation.repetition.cell().justify(Justify::Right),
                    allocation
                        .units
                        .iter()
                        .map(|unit| topology.describe_unit(*unit).to_string())
                        .collect::<Vec<_>>()
                        .join("\n")
                        .cell(),
                    format_std_duration(allocation.timeout).cell(),
                    allocation.sharing_group.as_deref().unwrap_or("").cell(),
                ],
                PlanEntry::Skipped {
                    instance,
                    workload,
                    repetition,
                    reason,
                } => vec![
                    instance.cell().justify(Justify::Right),
                    workload.as_str().cell().bold(true),
                    repetition.cell().justify(Justify::Right),
                    reason
                        .to_string()
                        .cell()
                        .foreground_color(Some(Color::Yellow)),
                    "".cell(),
                    "".cell(),
                ],
            })
            .collect();
        let header = vec![
            "Instance".cell().bold(true),
            "Workload".cell().bold(true),
            "Rep".cell().bold(true),
            "Resources".cell().bold(true),
            "Timeout".cell().bold(true),
            "Sharing group".cell().bold(true),
        ];
        self.print_horizontal_table(rows, header);

        let rows = vec![
            vec![
                "Name".cell().bold(true),
                spec.name.as_deref().unwrap_or("").cell(),
            ],
            vec![
                "Seed".cell().bold(true),
                spec.seed.cell().justify(Justify::Left),
            ],
            vec![
                "Allocated".cell().bold(true),
                plan.allocations().count().cell().justify(Justify::Left),
            ],
            vec![
                "Skipped".cell().bold(true),
                plan.skipped_count().cell().justify(Justify::Left),
            ],
        ];
        self.print_vertical_table(rows);
    }

    fn print_report(&self, report: &RunReport) {
        let rows: Vec<_> = report
            .results
            .iter()
            .map(|result| {
                vec![
                    result.workload.as_str().cell().bold(true),
                    result.instance.cell().justify(Justify::Right),
                    result.repetition.cell().justify(Justify::Right),
                    status_to_cell(result.status),
                    result.iterations.cell().justify(Justify::Right),
                    format_result_duration(result).cell(),
                    result.resources.join("\n").cell(),
                    result.detail.as_deref().unwrap_or("").cell(),
                ]
            })
            .collect();
        let header = vec![
            "Workload".cell().bold(true),
            "Instance".cell().bold(true),
            "Rep".cell().bold(true),
            "Status".cell().bold(true),
            "Iterations".cell().bold(true),
            "Duration".cell().bold(true),
            "Resources".cell().bold(true),
            "Detail".cell().bold(true),
        ];
        self.print_horizontal_table(rows, header);

        let summary = [
            (WorkloadStatus::Passed, STATUS_COLOR_PASSED),
            (WorkloadStatus::Failed, STATUS_COLOR_FAILED),
            (WorkloadStatus::TimedOut, STATUS_COLOR_TIMED_OUT),
            (WorkloadStatus::Skipped, STATUS_COLOR_SKIPPED),
        ]
        .into_iter()
        .filter_map(|(status, color)| {
            let count = report.count(status);
            (count > 0).then(|| {
                format!("{} ({count})", status.to_string().to_uppercase())
                    .color(color)
                    .to_string()
            })
        })
        .collect::<Vec<_>>()
        .join("\n");

        let mut rows = vec![
            vec!["Run".cell().bold(true), report.run_id.as_str().cell()],
            vec![
                "Name".cell().bold(true),
                report.name.as_deref().unwrap_or("").cell(),
            ],
            vec![
                "Seed".cell().bold(true),
                report.seed.cell().justify(Justify::Left),
            ],
            vec![
                "Started".cell().bold(true),
                format_time(report.started_at).cell(),
            ],
            vec![
                "Makespan".cell().bold(true),
                human_duration(report.ended_at - report.started_at).cell(),
            ],
            vec!["Results".cell().bold(true), summary.cell()],
        ];
        if let Some(error) = &report.fatal_error {
            rows.push(vec![
                "Fatal error".cell().bold(true),
                error.as_str().cell().foreground_color(Some(Color::Red)),
            ]);
        }
        rows.push(vec![
            "Verdict".cell().bold(true),
            verdict_to_cell(report.verdict),
        ]);
        self.print_vertical_table(rows);
    }

    fn print_error(&self, error: Error) {
        eprintln!("{error:?}");
    }
}

fn status_to_cell(status: WorkloadStatus) -> CellStruct {
    let color = match status {
        WorkloadStatus::Passed => Color::Green,
        WorkloadStatus::Failed => Color::Red,
        WorkloadStatus::TimedOut => Color::Magenta,
        WorkloadStatus::Skipped => Color::Yellow,
    };
    status
        .to_string()
        .to_uppercase()
        .cell()
        .foreground_color(Some(color))
}

fn verdict_to_cell(verdict: Verdict) -> CellStruct {
    let color = match verdict {
        Verdict::Pass => Color::Green,
        Verdict::Fail => Color::Red,
    };
    verdict.cell().bold(true).foreground_color(Some(color))
}

fn format_result_duration(result: &WorkloadResult) -> String {
    match (result.started_at, result.ended_at) {
        (Some(start), Some(end)) => human_duration(end - start),
        _ => String::new(),
    }
}

fn format_time(time: DateTime<Utc>) -> impl Display {
    let datetime: DateTime<Local> = time.into();
    datetime.format("%d.%m.%Y %H:%M:%S")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use xacore::InstanceId;

    fn result(started: Option<i64>, ended: Option<i64>) -> WorkloadResult {
        WorkloadResult {
            workload: "nst".into(),
            instance: InstanceId::new(0),
            repetition: 0,
            status: WorkloadStatus::Passed,
            started_at: started.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
            ended_at: ended.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
            iterations: 1,
            resources: vec![],
            detail: None,
        }
    }

    #[test]
    fn test_result_duration() {
        assert_eq!(format_result_duration(&result(Some(10), Some(100))), "1m 30s");
        assert_eq!(format_result_duration(&result(None, None)), "");
    }
}
