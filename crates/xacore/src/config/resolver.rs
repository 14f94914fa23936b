use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::common::error::ConfigError;
use crate::config::layer::{CliFlags, ConfigLayer, ConfigValue, SelectionInput};
use crate::config::{
    Concurrency, RunSpec, SharePolicyKind, SharingGroup, WorkloadOverride, defaults,
};
use crate::workload::WorkloadRegistry;

/// Merges configuration layers with CLI flags and validates the result against
/// the workload registry.
pub struct ConfigResolver<'a> {
    registry: &'a WorkloadRegistry,
}

impl<'a> ConfigResolver<'a> {
    pub fn new(registry: &'a WorkloadRegistry) -> Self {
        ConfigResolver { registry }
    }

    /// Precedence (lowest to highest): built-in defaults, `base`, `overrides`
    /// in the given order, `cli`.
    pub fn resolve(
        &self,
        base: Option<&ConfigLayer>,
        overrides: &[ConfigLayer],
        cli: &CliFlags,
    ) -> Result<RunSpec, ConfigError> {
        let mut merged = ConfigLayer::default();
        for layer in base.into_iter().chain(overrides.iter()) {
            for field in layer.unknown_fields() {
                log::warn!("Ignoring unknown configuration field `{field}` in {}", layer.source);
            }
            merged.merge(layer);
        }
        merged.merge(&cli.to_layer());
        self.build(merged, cli.check)
    }

    fn build(&self, config: ConfigLayer, check: bool) -> Result<RunSpec, ConfigError> {
        let exclude = self.check_names("exclude", config.exclude.iter())?;

        let mut workloads: Vec<String> = match &config.workloads {
            Some(SelectionInput::List(names)) => {
                self.check_names("workloads", names.iter())?;
                let mut selected = Vec::with_capacity(names.len());
                for name in names {
                    if !selected.contains(name) {
                        selected.push(name.clone());
                    }
                }
                selected
            }
            Some(SelectionInput::Keyword(keyword)) if keyword == "all" => {
                self.registry.names().map(|name| name.to_string()).collect()
            }
            Some(SelectionInput::Keyword(keyword)) => {
                return Err(ConfigError::invalid(
                    "workloads",
                    format!("expected a list of workloads or `all`, got `{keyword}`"),
                ));
            }
            None => {
                return Err(ConfigError::invalid("workloads", "no workloads were selected"));
            }
        };
        workloads.retain(|name| !exclude.contains(name));
        if workloads.is_empty() {
            return Err(ConfigError::invalid(
                "workloads",
                "every selected workload is excluded",
            ));
        }

        let mut overrides = BTreeMap::new();
        for (name, table) in &config.workload {
            if !self.registry.contains(name) {
                return Err(ConfigError::unknown_workload(name, "workload"));
            }
            let field = |key: &str| format!("workload.{name}.{key}");
            let value = WorkloadOverride {
                duration: table
                    .duration
                    .as_ref()
                    .map(|v| positive_seconds(&field("duration"), v))
                    .transpose()?,
                timeout: table
                    .timeout
                    .as_ref()
                    .map(|v| positive_seconds(&field("timeout"), v))
                    .transpose()?,
                repeat: table
                    .repeat
                    .as_ref()
                    .map(|v| positive_integer(&field("repeat"), v))
                    .transpose()?,
            };
            overrides.insert(name.clone(), value);
        }

        let mut sharing_groups: Vec<SharingGroup> = Vec::new();
        for group in config.sharing_groups.iter().flatten() {
            if group.name.is_empty() {
                return Err(ConfigError::invalid("sharing_groups", "group name cannot be empty"));
            }
            if sharing_groups.iter().any(|g| g.name == group.name) {
                return Err(ConfigError::invalid(
                    "sharing_groups",
                    format!("group `{}` is defined multiple times", group.name),
                ));
            }
            let members = self.check_names("sharing_groups", group.workloads.iter())?;
            for member in &members {
                if let Some(other) = sharing_groups.iter().find(|g| g.workloads.contains(member)) {
                    return Err(ConfigError::invalid(
                        "sharing_groups",
                        format!(
                            "workload `{member}` is a member of both `{}` and `{}`",
                            other.name, group.name
                        ),
                    ));
                }
            }
            sharing_groups.push(SharingGroup {
                name: group.name.clone(),
                workloads: members,
            });
        }

        let share_policy = match &config.sharing_policy {
            Some(policy) => policy
                .parse::<SharePolicyKind>()
                .map_err(|reason| ConfigError::invalid("sharing_policy", reason))?,
            None => SharePolicyKind::default(),
        };

        let mut nodes: Vec<String> = Vec::new();
        for node in config.nodes.iter().flatten() {
            if !nodes.contains(node) {
                nodes.push(node.clone());
            }
        }

        Ok(RunSpec {
            name: config.name,
            description: config.description,
            workloads,
            exclude,
            overrides,
            duration: optional(&config.duration, "duration", positive_seconds)?,
            timeout: optional(&config.timeout, "timeout", positive_seconds)?
                .unwrap_or(defaults::TIMEOUT),
            run_timeout: optional(&config.run_timeout, "run_timeout", positive_seconds)?,
            grace_period: optional(&config.grace_period, "grace_period", positive_seconds)?
                .unwrap_or(defaults::GRACE_PERIOD),
            delay: optional(&config.delay, "delay", non_negative_seconds)?
                .unwrap_or(defaults::DELAY),
            max_iterations: optional(&config.max_iterations, "max_iterations", positive_integer)?
                .unwrap_or(defaults::MAX_ITERATIONS),
            repeat: optional(&config.repeat, "repeat", positive_integer)?
                .unwrap_or(defaults::REPEAT),
            seed: optional(&config.seed, "seed", parse_seed)?.unwrap_or(defaults::SEED),
            concurrency: optional(&config.concurrency, "concurrency", parse_concurrency)?
                .unwrap_or(Concurrency::Unbounded),
            strict: optional(&config.strict, "strict", parse_bool)?.unwrap_or(false),
            maximize: optional(&config.maximize, "maximize", parse_bool)?.unwrap_or(false),
            share_policy,
            sharing_groups,
            nodes,
            check,
        })
    }

    fn check_names<'b>(
        &self,
        field: &str,
        names: impl Iterator<Item = &'b String>,
    ) -> Result<BTreeSet<String>, ConfigError> {
        names
            .map(|name| {
                if self.registry.contains(name) {
                    Ok(name.clone())
                } else {
                    Err(ConfigError::unknown_workload(name, field))
                }
            })
            .collect()
    }
}

fn optional<T>(
    value: &Option<ConfigValue>,
    field: &str,
    parse: fn(&str, &ConfigValue) -> Result<T, ConfigError>,
) -> Result<Option<T>, ConfigError> {
    value.as_ref().map(|v| parse(field, v)).transpose()
}

fn as_number(field: &str, value: &ConfigValue) -> Result<f64, ConfigError> {
    let number = match value {
        ConfigValue::Integer(v) => *v as f64,
        ConfigValue::Float(v) => *v,
        ConfigValue::Text(text) => text.trim().parse::<f64>().map_err(|_| {
            ConfigError::invalid(field, format!("expected a number, got {value}"))
        })?,
        ConfigValue::Bool(_) => {
            return Err(ConfigError::invalid(
                field,
                format!("expected a number, got {value}"),
            ));
        }
    };
    if !number.is_finite() {
        return Err(ConfigError::invalid(
            field,
            format!("expected a finite number, got {value}"),
        ));
    }
    Ok(number)
}

fn as_integer(field: &str, value: &ConfigValue) -> Result<i64, ConfigError> {
    match value {
        ConfigValue::Integer(v) => Ok(*v),
        ConfigValue::Text(text) => text.trim().parse::<i64>().map_err(|_| {
            ConfigError::invalid(field, format!("expected an integer, got {value}"))
        }),
        _ => Err(ConfigError::invalid(
            field,
            format!("expected an integer, got {value}"),
        )),
    }
}

fn seconds(field: &str, value: &ConfigValue, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        ConfigError::invalid(field, format!("{value} is not a valid number of seconds"))
    })
}

fn positive_seconds(field: &str, value: &ConfigValue) -> Result<Duration, ConfigError> {
    let secs = as_number(field, value)?;
    if secs <= 0.0 {
        return Err(ConfigError::invalid(
            field,
            format!("has to be positive, got {value}"),
        ));
    }
    seconds(field, value, secs)
}

fn non_negative_seconds(field: &str, value: &ConfigValue) -> Result<Duration, ConfigError> {
    let secs = as_number(field, value)?;
    if secs < 0.0 {
        return Err(ConfigError::invalid(
            field,
            format!("cannot be negative, got {value}"),
        ));
    }
    seconds(field, value, secs)
}

fn positive_integer(field: &str, value: &ConfigValue) -> Result<u32, ConfigError> {
    let number = as_integer(field, value)?;
    if number <= 0 {
        return Err(ConfigError::invalid(
            field,
            format!("has to be positive, got {value}"),
        ));
    }
    u32::try_from(number)
        .map_err(|_| ConfigError::invalid(field, format!("{value} is too large")))
}

fn parse_seed(field: &str, value: &ConfigValue) -> Result<u64, ConfigError> {
    let seed = as_integer(field, value)?;
    if seed < 0 || seed as u64 > defaults::MAX_SEED {
        return Err(ConfigError::invalid(
            field,
            format!("has to be between 0 and {}, got {value}", defaults::MAX_SEED),
        ));
    }
    Ok(seed as u64)
}

fn parse_concurrency(field: &str, value: &ConfigValue) -> Result<Concurrency, ConfigError> {
    match value {
        ConfigValue::Text(text) if text.trim() == "unbounded" => Ok(Concurrency::Unbounded),
        _ => positive_integer(field, value).map(Concurrency::Limited),
    }
}

fn parse_bool(field: &str, value: &ConfigValue) -> Result<bool, ConfigError> {
    match value {
        ConfigValue::Bool(v) => Ok(*v),
        ConfigValue::Text(text) => match text.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(ConfigError::invalid(
                field,
                format!("expected a boolean, got {value}"),
            )),
        },
        _ => Err(ConfigError::invalid(
            field,
            format!("expected a boolean, got {value}"),
        )),
    }
}
