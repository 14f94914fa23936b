use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Raw scalar as written by the user. Validation happens during resolution,
/// so that wrongly typed values are reported as `InvalidValue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(v) => write!(f, "{v}"),
            ConfigValue::Integer(v) => write!(f, "{v}"),
            ConfigValue::Float(v) => write!(f, "{v}"),
            ConfigValue::Text(v) => write!(f, "`{v}`"),
        }
    }
}

/// Either a list of workload names or a keyword (`"all"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectionInput {
    Keyword(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadOverrideLayer {
    #[serde(default)]
    pub duration: Option<ConfigValue>,
    #[serde(default)]
    pub timeout: Option<ConfigValue>,
    #[serde(default)]
    pub repeat: Option<ConfigValue>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl WorkloadOverrideLayer {
    fn merge(&mut self, other: &WorkloadOverrideLayer) {
        overwrite(&mut self.duration, &other.duration);
        overwrite(&mut self.timeout, &other.timeout);
        overwrite(&mut self.repeat, &other.repeat);
        self.extra
            .extend(other.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingGroupLayer {
    pub name: String,
    pub workloads: Vec<String>,
}

/// One layer of configuration (a configuration file, or the CLI flags).
/// Every recognized option is listed; anything else lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigLayer {
    /// Where the layer comes from, used in log messages
    #[serde(skip)]
    pub source: String,

    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub workloads: Option<SelectionInput>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub duration: Option<ConfigValue>,
    #[serde(default)]
    pub timeout: Option<ConfigValue>,
    #[serde(default)]
    pub run_timeout: Option<ConfigValue>,
    #[serde(default)]
    pub grace_period: Option<ConfigValue>,
    #[serde(default)]
    pub delay: Option<ConfigValue>,
    #[serde(default)]
    pub seed: Option<ConfigValue>,
    #[serde(default)]
    pub concurrency: Option<ConfigValue>,
    #[serde(default)]
    pub strict: Option<ConfigValue>,
    #[serde(default)]
    pub repeat: Option<ConfigValue>,
    #[serde(default)]
    pub max_iterations: Option<ConfigValue>,
    #[serde(default)]
    pub maximize: Option<ConfigValue>,
    #[serde(default)]
    pub sharing_policy: Option<String>,
    #[serde(default)]
    pub nodes: Option<Vec<String>>,
    #[serde(default)]
    pub sharing_groups: Option<Vec<SharingGroupLayer>>,
    #[serde(default)]
    pub workload: BTreeMap<String, WorkloadOverrideLayer>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ConfigLayer {
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Dotted paths of all fields that were not recognized.
    pub fn unknown_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self.extra.keys().cloned().collect();
        for (name, table) in &self.workload {
            fields.extend(table.extra.keys().map(|key| format!("workload.{name}.{key}")));
        }
        fields
    }

    /// Applies a higher-precedence layer on top of this one.
    ///
    /// Scalars are overwritten, exclusions are united, per-workload tables are
    /// merged field by field, sharing groups and nodes are replaced.
    pub fn merge(&mut self, other: &ConfigLayer) {
        overwrite(&mut self.name, &other.name);
        overwrite(&mut self.description, &other.description);
        overwrite(&mut self.workloads, &other.workloads);
        for name in &other.exclude {
            if !self.exclude.contains(name) {
                self.exclude.push(name.clone());
            }
        }
        overwrite(&mut self.duration, &other.duration);
        overwrite(&mut self.timeout, &other.timeout);
        overwrite(&mut self.run_timeout, &other.run_timeout);
        overwrite(&mut self.grace_period, &other.grace_period);
        overwrite(&mut self.delay, &other.delay);
        overwrite(&mut self.seed, &other.seed);
        overwrite(&mut self.concurrency, &other.concurrency);
        overwrite(&mut self.strict, &other.strict);
        overwrite(&mut self.repeat, &other.repeat);
        overwrite(&mut self.max_iterations, &other.max_iterations);
        overwrite(&mut self.maximize, &other.maximize);
        overwrite(&mut self.sharing_policy, &other.sharing_policy);
        overwrite(&mut self.nodes, &other.nodes);
        overwrite(&mut self.sharing_groups, &other.sharing_groups);
        for (name, table) in &other.workload {
            self.workload.entry(name.clone()).or_default().merge(table);
        }
        self.extra
            .extend(other.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

fn overwrite<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
    if let Some(value) = value {
        *target = Some(value.clone());
    }
}

/// Explicit command line flags, the highest-precedence layer.
/// Numeric flags are kept as text and validated by the resolver.
#[derive(Debug, Clone, Default)]
pub struct CliFlags {
    pub workloads: Vec<String>,
    pub all: bool,
    pub exclude: Vec<String>,
    pub duration: Option<String>,
    pub timeout: Option<String>,
    pub run_timeout: Option<String>,
    pub seed: Option<String>,
    pub concurrency: Option<String>,
    pub repeat: Option<String>,
    pub grace_period: Option<String>,
    pub delay: Option<String>,
    pub max_iterations: Option<String>,
    pub sharing_policy: Option<String>,
    pub strict: bool,
    pub maximize: bool,
    pub nodes: Vec<String>,
    pub check: bool,
}

impl CliFlags {
    pub(crate) fn to_layer(&self) -> ConfigLayer {
        let text = |value: &Option<String>| value.clone().map(ConfigValue::Text);
        let workloads = if !self.workloads.is_empty() {
            Some(SelectionInput::List(self.workloads.clone()))
        } else if self.all {
            Some(SelectionInput::Keyword("all".to_string()))
        } else {
            None
        };
        ConfigLayer {
            source: "command line".to_string(),
            workloads,
            exclude: self.exclude.clone(),
            duration: text(&self.duration),
            timeout: text(&self.timeout),
            run_timeout: text(&self.run_timeout),
            seed: text(&self.seed),
            concurrency: text(&self.concurrency),
            repeat: text(&self.repeat),
            grace_period: text(&self.grace_period),
            delay: text(&self.delay),
            max_iterations: text(&self.max_iterations),
            sharing_policy: self.sharing_policy.clone(),
            strict: self.strict.then_some(ConfigValue::Bool(true)),
            maximize: self.maximize.then_some(ConfigValue::Bool(true)),
            nodes: (!self.nodes.is_empty()).then(|| self.nodes.clone()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_overwrites_scalars_and_unites_exclusions() {
        let mut base = ConfigLayer {
            duration: Some(ConfigValue::Integer(10)),
            timeout: Some(ConfigValue::Integer(100)),
            exclude: vec!["a".into()],
            ..Default::default()
        };
        let user = ConfigLayer {
            timeout: Some(ConfigValue::Integer(200)),
            exclude: vec!["b".into(), "a".into()],
            ..Default::default()
        };
        base.merge(&user);
        assert_eq!(base.duration, Some(ConfigValue::Integer(10)));
        assert_eq!(base.timeout, Some(ConfigValue::Integer(200)));
        assert_eq!(base.exclude, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_merge_workload_tables_per_field() {
        let mut base = ConfigLayer::default();
        base.workload.insert(
            "nst".into(),
            WorkloadOverrideLayer {
                duration: Some(ConfigValue::Integer(5)),
                repeat: Some(ConfigValue::Integer(2)),
                ..Default::default()
            },
        );
        let mut user = ConfigLayer::default();
        user.workload.insert(
            "nst".into(),
            WorkloadOverrideLayer {
                duration: Some(ConfigValue::Integer(7)),
                ..Default::default()
            },
        );
        base.merge(&user);
        let nst = &base.workload["nst"];
        assert_eq!(nst.duration, Some(ConfigValue::Integer(7)));
        assert_eq!(nst.repeat, Some(ConfigValue::Integer(2)));
    }

    #[test]
    fn test_unknown_fields_are_collected() {
        let layer: ConfigLayer = serde_json::from_str(
            r#"{"timeout": 5, "accelerators": 8, "workload": {"nst": {"repeat": 2, "binary": "x"}}}"#,
        )
        .unwrap();
        assert_eq!(layer.timeout, Some(ConfigValue::Integer(5)));
        assert_eq!(
            layer.unknown_fields(),
            vec!["accelerators".to_string(), "workload.nst.binary".to_string()]
        );
    }

    #[test]
    fn test_cli_workloads_win_over_all() {
        let flags = CliFlags {
            workloads: vec!["nst".into()],
            all: true,
            ..Default::default()
        };
        assert_eq!(
            flags.to_layer().workloads,
            Some(SelectionInput::List(vec!["nst".into()]))
        );
    }
}
