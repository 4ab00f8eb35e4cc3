use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike};
use serde_json::Value;
use tracing::{debug, info};

use crate::device::Device;
use crate::opmode::OperationMode;
use crate::schema::{fill_template, ScheduleDef};
use crate::types::{Bound, BusType, Day, Lookup, ScheduleMode, SetpointEntry};
use crate::Result;

pub const DEFAULT_MIN_HC_TEMP: f64 = 5.0;
pub const DEFAULT_MAX_HC_TEMP: f64 = 30.0;

const SWITCH_PROGRAM_MODE: &str = "switchProgramMode";
const SETPOINT_PROPERTY: &str = "setpointProperty";

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchPoint {
    pub day: Day,
    pub minutes: u32,
    /// Level name, or the temperature itself in absolute mode.
    pub setpoint: String,
}

impl SwitchPoint {
    pub fn new(day: Day, minutes: u32, setpoint: impl Into<String>) -> Self {
        Self {
            day,
            minutes,
            setpoint: setpoint.into(),
        }
    }
}

/// Latest switch point at or before (`day`, `minutes`), searching backwards
/// through the week and wrapping around past Monday 00:00.
pub fn active_switch_point(points: &[SwitchPoint], day: Day, minutes: u32) -> Option<&SwitchPoint> {
    if points.is_empty() {
        return None;
    }
    // `None` marks "now"; it goes last so a stable sort keeps it after a
    // switch point at the very same minute.
    let mut order: Vec<((usize, u32), Option<usize>)> = points
        .iter()
        .enumerate()
        .map(|(i, p)| ((p.day.index(), p.minutes), Some(i)))
        .collect();
    order.push(((day.index(), minutes), None));
    order.sort_by_key(|(key, _)| *key);

    let now = order.iter().position(|(_, idx)| idx.is_none())?;
    let before = if now == 0 { order.len() - 1 } else { now - 1 };
    order[before].1.map(|i| &points[i])
}

/// Parses the gateway clock. Offsets are ignored; schedules run on wall time.
pub fn parse_device_time(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    let head = raw.get(..19)?;
    NaiveDateTime::parse_from_str(head, "%Y-%m-%dT%H:%M:%S").ok()
}

fn minutes_since_midnight(t: &NaiveDateTime) -> u32 {
    t.hour() * 60 + t.minute()
}

/// Weekly program of one circuit plus the setpoint levels it refers to.
#[derive(Debug, Clone)]
pub struct Schedule {
    def: ScheduleDef,
    circuit_path: String,
    circuit_name: String,
    bus_type: BusType,
    has_mode_ref: bool,
    mode: ScheduleMode,
    switch_points: Vec<SwitchPoint>,
    setpoints: HashMap<String, SetpointEntry>,
    time: Option<String>,
    active_program: Option<String>,
    found: bool,
}

impl Schedule {
    /// `circuit_path` is the circuit's own path, e.g. `/heatingCircuits/hc1`.
    /// `has_mode_ref` enables reading the schedule mode from the device.
    pub fn new(def: ScheduleDef, circuit_path: &str, bus_type: BusType, has_mode_ref: bool) -> Self {
        let circuit_name = circuit_path.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            mode: def.default_mode,
            def,
            circuit_path: circuit_path.to_string(),
            circuit_name,
            bus_type,
            has_mode_ref,
            switch_points: Vec::new(),
            setpoints: HashMap::new(),
            time: None,
            active_program: None,
            found: false,
        }
    }

    pub fn setpoints(&self) -> &HashMap<String, SetpointEntry> {
        &self.setpoints
    }

    pub fn switch_points(&self) -> &[SwitchPoint] {
        &self.switch_points
    }

    pub fn time(&self) -> Option<&str> {
        self.time.as_deref()
    }

    pub fn active_program(&self) -> Option<&str> {
        self.active_program.as_deref()
    }

    pub fn mode(&self) -> ScheduleMode {
        self.mode
    }

    pub fn is_found(&self) -> bool {
        self.found
    }

    /// Reloads the program named `active_program` from the device.
    ///
    /// `now` is the gateway clock as read by the caller. Without a usable
    /// clock, or when the program cannot be read, the schedule stays in the
    /// "not found" state and every lookup answers [`Lookup::ActiveProgram`].
    pub async fn update<D: Device>(&mut self, device: &D, active_program: &str, now: Option<String>) {
        self.active_program = Some(active_program.to_string());
        let uri = fill_template(&self.def.program, &[&self.circuit_name, active_program]);

        if self.has_mode_ref {
            let mode_uri = format!("{}/{}", self.circuit_path, SWITCH_PROGRAM_MODE);
            if let Ok(result) = device.get(&mode_uri).await {
                let raw = result.get("value").and_then(Value::as_str);
                self.mode = match raw.and_then(ScheduleMode::from_device_str) {
                    Some(mode) => mode,
                    None => {
                        debug!(mode = ?raw, "unknown switch program mode, assuming levels");
                        ScheduleMode::Levels
                    }
                };
            }
        }

        self.time = now;
        if !self.has_clock() {
            self.found = false;
            info!(program = active_program, time = ?self.time, "gateway time unavailable, falling back to active program property");
            return;
        }
        match self.load_program(device, &uri).await {
            Ok(()) => self.found = true,
            Err(e) => {
                self.found = false;
                info!(program = active_program, error = %e, "active program not readable, falling back to active program property");
            }
        }
    }

    async fn load_program<D: Device>(&mut self, device: &D, uri: &str) -> Result<()> {
        let result = device.get(uri).await?;
        let points = self.parse_switch_points(&result);
        let setpoint_prefix = result
            .get(SETPOINT_PROPERTY)
            .and_then(|p| p.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}/temperatureLevels", self.circuit_path));

        if self.mode == ScheduleMode::Levels {
            for point in &points {
                if !self.setpoints.contains_key(&point.setpoint) {
                    let entry = self.fetch_setpoint(device, &setpoint_prefix, &point.setpoint).await?;
                    self.setpoints.insert(point.setpoint.clone(), entry);
                }
            }
        }
        self.switch_points = points;
        Ok(())
    }

    fn parse_switch_points(&self, result: &Value) -> Vec<SwitchPoint> {
        let Some(items) = result.get(&self.def.switch_points).and_then(Value::as_array) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                let day = item.get(&self.def.day).and_then(Value::as_str).and_then(Day::from_tag)?;
                let minutes = item.get(&self.def.time).and_then(Value::as_u64)?;
                let setpoint = match item.get(&self.def.setpoint)? {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some(SwitchPoint::new(day, u32::try_from(minutes).ok()?, setpoint))
            })
            .collect()
    }

    async fn fetch_setpoint<D: Device>(&self, device: &D, prefix: &str, name: &str) -> Result<SetpointEntry> {
        let mut uri = format!("{prefix}/{name}");
        debug!(uri = %uri, "fetching setpoint level");
        let result = match device.get(&uri).await {
            Ok(result) => {
                if self.bus_type == BusType::Can && result.get("value").and_then(Value::as_f64) == Some(1.0) {
                    uri = format!("{}/currentSetpoint", self.circuit_path);
                    device.get(&uri).await?
                } else {
                    result
                }
            }
            Err(_) if name == "on" && self.bus_type != BusType::Can => {
                uri = format!("{prefix}/high");
                device.get(&uri).await?
            }
            Err(_) if name == "off" => Value::Null,
            Err(e) => return Err(e),
        };

        let field = |key: &str| result.get(key).and_then(Value::as_f64).unwrap_or(0.0);
        Ok(SetpointEntry {
            name: name.to_string(),
            value: field("value"),
            min: field("minValue"),
            max: field("maxValue"),
            uri: Some(uri),
        })
    }

    pub fn load(&mut self, active_program: &str, points: Vec<SwitchPoint>, now: Option<String>) {
        self.active_program = Some(active_program.to_string());
        self.switch_points = points;
        self.time = now;
        self.found = self.has_clock();
    }

    pub fn insert_setpoint(&mut self, entry: SetpointEntry) {
        self.setpoints.insert(entry.name.clone(), entry);
    }

    pub fn set_mode(&mut self, mode: ScheduleMode) {
        self.mode = mode;
    }

    pub fn set_time(&mut self, now: Option<String>) {
        self.time = now;
    }

    fn has_clock(&self) -> bool {
        self.time.as_deref().and_then(parse_device_time).is_some()
    }

    fn is_ready(&self) -> bool {
        self.found && self.has_clock()
    }

    /// The setpoint in force at the gateway's current time.
    pub fn resolve_active(&self) -> Option<SetpointEntry> {
        let now = parse_device_time(self.time.as_deref()?)?;
        let day = Day::from(now.weekday());
        let point = active_switch_point(&self.switch_points, day, minutes_since_midnight(&now))?;
        match self.mode {
            ScheduleMode::Levels => self.setpoints.get(&point.setpoint).cloned(),
            ScheduleMode::Absolute => Some(SetpointEntry {
                name: "absolute".to_string(),
                value: point.setpoint.trim().parse().ok()?,
                min: DEFAULT_MIN_HC_TEMP,
                max: DEFAULT_MAX_HC_TEMP,
                uri: None,
            }),
        }
    }

    fn manual_entry(&self, op: &OperationMode) -> Option<&SetpointEntry> {
        self.setpoints.get(op.current_mode())
    }

    pub fn temp_for_current_mode(&self, op: &OperationMode) -> Lookup<f64> {
        if op.is_manual() {
            return Lookup::Found(self.manual_entry(op).map_or(-1.0, |e| e.value));
        }
        if !self.is_ready() {
            return Lookup::ActiveProgram;
        }
        Lookup::Found(self.resolve_active().map_or(0.0, |e| e.value))
    }

    /// Min or max bound for the current mode.
    ///
    /// A cached entry whose value lies outside its own bounds is not trusted
    /// and `fallback` is returned instead.
    pub fn min_max_for_mode(&self, bound: Bound, op: &OperationMode, fallback: Option<f64>) -> Lookup<f64> {
        let fallback = match fallback {
            Some(v) if v != 0.0 => v,
            _ if op.is_manual() => -1.0,
            _ => 0.0,
        };
        let pick = |e: &SetpointEntry| match bound {
            Bound::Min => e.min,
            Bound::Max => e.max,
        };
        if op.is_manual() {
            return Lookup::Found(self.manual_entry(op).map_or(fallback, pick));
        }
        if !self.is_ready() {
            return Lookup::ActiveProgram;
        }
        let Some(entry) = self.resolve_active() else {
            return Lookup::Found(fallback);
        };
        if (bound == Bound::Max && entry.value > entry.max) || entry.value < entry.min {
            return Lookup::Found(fallback);
        }
        Lookup::Found(pick(&entry))
    }

    pub fn setpoint_for_current_mode(&self, op: &OperationMode) -> Lookup<Option<String>> {
        if op.is_manual() {
            return Lookup::Found(self.manual_entry(op).map(|e| e.name.clone()));
        }
        if !self.is_ready() {
            return Lookup::ActiveProgram;
        }
        Lookup::Found(self.resolve_active().map(|e| {
            if self.bus_type == BusType::Can && e.name == "on" {
                "currentSetpoint".to_string()
            } else {
                e.name
            }
        }))
    }

    /// Property path to write when changing the setpoint in force.
    pub fn uri_for_current_mode(&self, op: &OperationMode) -> Lookup<Option<String>> {
        if op.is_manual() {
            return Lookup::Found(self.manual_entry(op).and_then(|e| e.uri.clone()));
        }
        if !self.is_ready() {
            return Lookup::ActiveProgram;
        }
        Lookup::Found(self.resolve_active().and_then(|e| e.uri))
    }

    /// Stores a freshly written temperature for the setpoint in force.
    pub fn cache_temp_for_mode(&mut self, op: &OperationMode, temp: f64) {
        let name = if op.is_auto() {
            match self.resolve_active() {
                Some(e) => e.name,
                None => return,
            }
        } else {
            op.current_mode().to_string()
        };
        if let Some(entry) = self.setpoints.get_mut(&name) {
            entry.value = temp;
        }
    }
}
