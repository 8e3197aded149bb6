//! Command-line and environment configuration surface.
//!
//! Every component contributes its options to one [`FlagSet`] through
//! `Component::init_flags`. The set is parsed once with clap: a value given on
//! the command line wins over the environment, which wins over the default.
//! The environment name of a flag is derived from its name, see
//! [`FlagSet::env_name`].

use crate::error::{Result, ServiceError};
use crate::util::render_table;
use clap::builder::BoolishValueParser;
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Flag used to request the environment table instead of starting.
pub const OUTENV_FLAG: &str = "outenv";

/// Value type of a flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    Str,
    Int,
    Bool,
}

/// A single registered option
#[derive(Debug, Clone)]
pub struct FlagSpec {
    pub name: String,
    pub usage: String,
    pub default: String,
    pub kind: FlagKind,
}

impl FlagSpec {
    /// Zero-valued defaults are not shown in usage or in the env table.
    fn has_zero_default(&self) -> bool {
        matches!(self.default.as_str(), "" | "0" | "false")
    }

    fn display_default(&self) -> String {
        if self.has_zero_default() {
            String::new()
        } else if self.kind == FlagKind::Str {
            format!("{:?}", self.default)
        } else {
            self.default.clone()
        }
    }
}

/// Parsed value of a flag
#[derive(Debug, Clone, PartialEq)]
pub enum FlagValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Str(value) => write!(f, "{}", value),
            FlagValue::Int(value) => write!(f, "{}", value),
            FlagValue::Bool(value) => write!(f, "{}", value),
        }
    }
}

/// Where a parsed value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagSource {
    Default,
    Environment,
    CommandLine,
}

/// Collection of options contributed by all components of a service
#[derive(Debug, Clone)]
pub struct FlagSet {
    app_name: String,
    version: Option<String>,
    env_prefix: String,
    flags: Vec<FlagSpec>,
    names: HashSet<String>,
    duplicates: Vec<String>,
}

impl FlagSet {
    pub fn new<S: Into<String>>(app_name: S) -> Self {
        Self {
            app_name: app_name.into(),
            version: None,
            env_prefix: String::new(),
            flags: Vec::new(),
            names: HashSet::new(),
            duplicates: Vec::new(),
        }
    }

    pub fn with_version<S: Into<String>>(mut self, version: S) -> Self {
        let version = version.into();
        if !version.is_empty() {
            self.version = Some(version);
        }
        self
    }

    /// Prefix prepended to every derived environment variable name
    pub fn with_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn string(&mut self, name: &str, default: &str, usage: &str) {
        self.add(name, default.to_string(), usage, FlagKind::Str);
    }

    pub fn int(&mut self, name: &str, default: i64, usage: &str) {
        self.add(name, default.to_string(), usage, FlagKind::Int);
    }

    pub fn bool(&mut self, name: &str, default: bool, usage: &str) {
        self.add(name, default.to_string(), usage, FlagKind::Bool);
    }

    fn add(&mut self, name: &str, default: String, usage: &str, kind: FlagKind) {
        // Reported by `parse_from`; registration itself never fails.
        if !self.names.insert(name.to_string()) {
            self.duplicates.push(name.to_string());
            return;
        }

        self.flags.push(FlagSpec {
            name: name.to_string(),
            usage: usage.to_string(),
            default,
            kind,
        });
    }

    pub fn flags(&self) -> &[FlagSpec] {
        &self.flags
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Environment variable read for a flag: `http-port` becomes `HTTP_PORT`.
    pub fn env_name(&self, flag: &str) -> String {
        let name = flag.replace(['.', '-'], "_");
        format!("{}{}", self.env_prefix, name).to_uppercase()
    }

    /// Build the clap command describing every registered flag
    pub fn command(&self) -> Command {
        let mut command = Command::new(self.app_name.clone());
        if let Some(version) = &self.version {
            command = command.version(version.clone());
        }

        for spec in &self.flags {
            let arg = Arg::new(spec.name.clone())
                .long(spec.name.clone())
                .env(self.env_name(&spec.name))
                .help(spec.usage.clone())
                .default_value(spec.default.clone())
                .action(ArgAction::Set);

            let arg = match spec.kind {
                FlagKind::Str => arg,
                FlagKind::Int => arg
                    .value_parser(clap::value_parser!(i64))
                    .allow_negative_numbers(true),
                FlagKind::Bool => arg
                    .num_args(0..=1)
                    .default_missing_value("true")
                    .value_parser(BoolishValueParser::new()),
            };

            command = command.arg(arg);
        }

        command
    }

    /// Parse the given arguments (binary name first) together with the
    /// process environment.
    pub fn parse_from<I, T>(&self, args: I) -> Result<FlagValues>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        if let Some(name) = self.duplicates.first() {
            return Err(ServiceError::DuplicateFlag { name: name.clone() });
        }

        let matches = self.command().try_get_matches_from(args)?;
        let values = self.collect(&matches);
        debug!("Parsed {} flags for {}", values.len(), self.app_name);
        Ok(values)
    }

    fn collect(&self, matches: &ArgMatches) -> FlagValues {
        let mut values = FlagValues::default();

        for spec in &self.flags {
            let value = match spec.kind {
                FlagKind::Str => matches
                    .get_one::<String>(&spec.name)
                    .cloned()
                    .map(FlagValue::Str),
                FlagKind::Int => matches.get_one::<i64>(&spec.name).copied().map(FlagValue::Int),
                FlagKind::Bool => matches
                    .get_one::<bool>(&spec.name)
                    .copied()
                    .map(FlagValue::Bool),
            };

            let source = match matches.value_source(&spec.name) {
                Some(ValueSource::CommandLine) => FlagSource::CommandLine,
                Some(ValueSource::EnvVariable) => FlagSource::Environment,
                _ => FlagSource::Default,
            };

            if let Some(value) = value {
                values.values.insert(spec.name.clone(), value);
                values.sources.insert(spec.name.clone(), source);
            }
        }

        values
    }

    /// Rows of the sample environment table: group, name, default, usage
    pub fn sample_envs(&self) -> Vec<Vec<String>> {
        self.flags
            .iter()
            .filter(|spec| spec.name != OUTENV_FLAG)
            .map(|spec| {
                let env_name = self.env_name(&spec.name);
                let group = env_name.split('_').next().unwrap_or_default().to_string();
                vec![group, env_name, spec.display_default(), spec.usage.clone()]
            })
            .collect()
    }

    pub fn render_env_table(&self) -> String {
        let mut rows = self.sample_envs();

        // Consecutive rows of the same group share one group cell
        let mut previous = String::new();
        for row in rows.iter_mut() {
            if row[0] == previous {
                row[0].clear();
            } else {
                previous = row[0].clone();
            }
        }

        render_table(&["GROUP", "NAME", "DEFAULT VALUE", "USAGE"], &rows)
    }
}

/// Values of a parsed [`FlagSet`], handed to `Component::configure`
#[derive(Debug, Clone, Default)]
pub struct FlagValues {
    values: HashMap<String, FlagValue>,
    sources: HashMap<String, FlagSource>,
}

impl FlagValues {
    pub fn get(&self, name: &str) -> Option<&FlagValue> {
        self.values.get(name)
    }

    pub fn source(&self, name: &str) -> Option<FlagSource> {
        self.sources.get(name).copied()
    }

    /// Set a value directly, as if it had been given on the command line
    pub fn insert<S: Into<String>>(&mut self, name: S, value: FlagValue) {
        let name = name.into();
        self.sources.insert(name.clone(), FlagSource::CommandLine);
        self.values.insert(name, value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn string(&self, name: &str) -> Result<String> {
        match self.get(name) {
            Some(FlagValue::Str(value)) => Ok(value.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(missing(name)),
        }
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        match self.get(name) {
            Some(FlagValue::Int(value)) => Ok(*value),
            Some(FlagValue::Str(value)) => value.parse().map_err(|_| ServiceError::Flag {
                message: format!("flag {} is not an integer: {:?}", name, value),
            }),
            Some(FlagValue::Bool(_)) => Err(ServiceError::Flag {
                message: format!("flag {} is a boolean, not an integer", name),
            }),
            None => Err(missing(name)),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        match self.get(name) {
            Some(FlagValue::Bool(value)) => Ok(*value),
            Some(other) => Err(ServiceError::Flag {
                message: format!("flag {} is not a boolean: {}", name, other),
            }),
            None => Err(missing(name)),
        }
    }

    /// Parse the textual value of a flag into any `FromStr` type
    pub fn parse<T>(&self, name: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.string(name)?;
        raw.parse().map_err(|e: T::Err| ServiceError::Flag {
            message: format!("invalid value {:?} for flag {}: {}", raw, name, e),
        })
    }
}

fn missing(name: &str) -> ServiceError {
    ServiceError::Flag {
        message: format!("flag {} is not registered", name),
    }
}
