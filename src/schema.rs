use std::collections::BTreeMap;

use serde::Deserialize;

use crate::opmode::ModeTable;
use crate::types::{BusType, ScheduleMode};

pub const DEFAULT_DATE_PATH: &str = "/gateway/DateTime";

/// Static description of one circuit type, as shipped with the gateway
/// family's capability database.
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitSchema {
    /// Property key -> relative path under the circuit.
    pub refs: BTreeMap<String, PropertyRef>,
    #[serde(default)]
    pub mode_to_setpoint: ModeTable,
    #[serde(default)]
    pub schedule: Option<ScheduleDef>,
    #[serde(default)]
    pub min_ref: Option<String>,
    #[serde(default)]
    pub max_ref: Option<String>,
    #[serde(default = "default_date_path")]
    pub date_path: String,
    #[serde(default)]
    pub bus_type: BusType,
    #[serde(default)]
    pub inclusive_bounds: bool,
    #[serde(default)]
    pub manual_override: Option<ManualOverride>,
}

impl CircuitSchema {
    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyRef {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: PropertyKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    #[default]
    Regular,
    OperationMode,
    #[serde(other)]
    Other,
}

/// Where the weekly program lives and how its switch points are spelled.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleDef {
    /// Template with two `{}` holes: circuit name, program name.
    pub program: String,
    #[serde(default = "default_switch_points_key")]
    pub switch_points: String,
    #[serde(default = "default_day_key")]
    pub day: String,
    #[serde(default = "default_time_key")]
    pub time: String,
    #[serde(default = "default_setpoint_key")]
    pub setpoint: String,
    #[serde(default)]
    pub default_mode: ScheduleMode,
}

/// Nefit circuits in auto mode take a temporary override instead of a
/// schedule level write.
#[derive(Debug, Clone, Deserialize)]
pub struct ManualOverride {
    pub value_ref: String,
    pub status_ref: String,
}

fn default_date_path() -> String {
    DEFAULT_DATE_PATH.to_string()
}

fn default_switch_points_key() -> String {
    "switchPoints".to_string()
}

fn default_day_key() -> String {
    "dayOfWeek".to_string()
}

fn default_time_key() -> String {
    "time".to_string()
}

fn default_setpoint_key() -> String {
    "setpoint".to_string()
}

pub(crate) fn fill_template(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut rest = template;
    while let Some(pos) = rest.find("{}") {
        out.push_str(&rest[..pos]);
        out.push_str(args.next().copied().unwrap_or_default());
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}
