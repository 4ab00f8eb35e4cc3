use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::device::Device;
use crate::opmode::OperationMode;
use crate::schedule::Schedule;
use crate::schema::{CircuitSchema, PropertyKind};
use crate::types::{Bound, Lookup};
use crate::{Error, Result};

pub const DEFAULT_MIN_TEMP: f64 = 0.0;
pub const DEFAULT_MAX_TEMP: f64 = 100.0;

const ACTIVE_PROGRAM: &str = "activeProgram";
const SWITCH_PROGRAMS: &str = "switchPrograms";
const SWITCH_PROGRAM_MODE: &str = "switchProgramMode";
const CURRENT_TEMP: &str = "current_temp";

#[derive(Debug, Clone)]
pub struct Property {
    pub uri: String,
    pub kind: PropertyKind,
    pub result: Value,
}

/// How a temperature write reaches the device.
enum WriteTarget {
    Direct { uri: String, cache_key: Option<String> },
    Override { uri: String, status_uri: String },
    Schedule { uri: String },
    ActiveProgram { uri: String, cache_key: String },
}

/// One heating, hot water or zone loop of the gateway.
pub struct Circuit<D> {
    device: Arc<D>,
    path: String,
    name: String,
    schema: CircuitSchema,
    data: BTreeMap<String, Property>,
    op_mode: OperationMode,
    schedule: Option<Schedule>,
    target_temp: f64,
    state: bool,
}

impl<D: Device> Circuit<D> {
    /// `path` is the circuit's own path, e.g. `/heatingCircuits/hc1`.
    pub fn new(device: Arc<D>, path: &str, schema: CircuitSchema) -> Self {
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        let data = schema
            .refs
            .iter()
            .map(|(key, r)| {
                let prop = Property {
                    uri: format!("{}/{}", path, r.id),
                    kind: r.kind,
                    result: Value::Null,
                };
                (key.clone(), prop)
            })
            .collect();
        let op_mode = OperationMode::new(Arc::new(schema.mode_to_setpoint.clone()));
        let schedule = schema.schedule.clone().map(|def| {
            Schedule::new(def, path, schema.bus_type, schema.refs.contains_key(SWITCH_PROGRAM_MODE))
        });

        Self {
            device,
            path: path.to_string(),
            name,
            schema,
            data,
            op_mode,
            schedule,
            target_temp: 0.0,
            state: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> bool {
        self.state
    }

    pub fn op_mode(&self) -> &OperationMode {
        &self.op_mode
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    pub fn schedule_mut(&mut self) -> Option<&mut Schedule> {
        self.schedule.as_mut()
    }

    pub fn properties(&self) -> &BTreeMap<String, Property> {
        &self.data
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.data.get(key).map(|p| &p.result)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.property(key)?.get("value")
    }

    fn number(&self, key: &str, field: &str) -> Option<f64> {
        as_number(self.property(key)?.get(field)?)
    }

    pub fn set_property(&mut self, key: &str, result: Value) {
        if let Some(prop) = self.data.get_mut(key) {
            if prop.kind == PropertyKind::OperationMode && !self.op_mode.is_set() {
                self.op_mode.init(&result, &prop.uri);
            }
            prop.result = result;
        }
    }

    /// Reads every property, then reloads the schedule for the active program.
    ///
    /// Failing properties are skipped unless the failure is not recoverable.
    pub async fn update(&mut self) -> Result<()> {
        let keys: Vec<String> = self.data.keys().cloned().collect();
        for key in keys {
            match self.update_requested_key(&key).await {
                Ok(()) => self.state = true,
                Err(e) if e.is_recoverable() => {
                    debug!(circuit = %self.name, key = %key, error = %e, "skipping property");
                }
                Err(e) => return Err(e),
            }
        }
        self.update_schedule().await;
        Ok(())
    }

    pub async fn update_requested_key(&mut self, key: &str) -> Result<()> {
        let Some(uri) = self.data.get(key).map(|p| p.uri.clone()) else {
            return Err(Error::NotSupported(format!("{} has no property {key}", self.name)));
        };
        let result = self.device.get(&uri).await?;
        self.set_property(key, result);
        Ok(())
    }

    async fn update_schedule(&mut self) {
        let Some(program) = self.active_program() else {
            return;
        };
        let now = self.device_time().await;
        let device = Arc::clone(&self.device);
        if let Some(schedule) = self.schedule.as_mut() {
            schedule.update(device.as_ref(), &program, now).await;
        }
    }

    async fn device_time(&self) -> Option<String> {
        match self.device.get(&self.schema.date_path).await {
            Ok(result) => result.get("value").and_then(Value::as_str).map(str::to_string),
            Err(e) => {
                debug!(error = %e, "cannot read gateway time");
                None
            }
        }
    }

    /// Name of the running program, or the first one the circuit lists.
    pub fn active_program(&self) -> Option<String> {
        if let Some(program) = self.value(ACTIVE_PROGRAM).and_then(Value::as_str) {
            return Some(program.to_string());
        }
        let first = self.property(SWITCH_PROGRAMS)?.get("references")?.get(0)?;
        let id = first.get("id")?.as_str()?;
        id.rsplit('/').next().map(str::to_string)
    }

    pub fn current_temp(&self) -> Option<f64> {
        self.value(CURRENT_TEMP)
            .and_then(as_number)
            .filter(|t| *t > 0.0 && *t < 120.0)
    }

    fn temp_setpoint(&self) -> Option<&str> {
        self.op_mode.setpoint_property(None, false)
    }

    fn active_program_setpoint(&self) -> Option<String> {
        let program = self.schedule.as_ref()?.active_program()?;
        self.op_mode.setpoint_property(Some(program), false).map(str::to_string)
    }

    fn value_from_active_setpoint(&self, field: &str) -> f64 {
        let default = match field {
            "minValue" => DEFAULT_MIN_TEMP,
            "maxValue" => DEFAULT_MAX_TEMP,
            _ => 0.0,
        };
        self.active_program_setpoint()
            .and_then(|key| self.number(&key, field))
            .unwrap_or(default)
    }

    /// Name of the setpoint the circuit is following right now.
    pub fn setpoint(&self) -> Option<String> {
        if self.op_mode.is_off() {
            return Some("off".to_string());
        }
        if self.op_mode.is_manual() {
            return Some(self.op_mode.current_mode().to_string());
        }
        let schedule = self.schedule.as_ref()?;
        match schedule.setpoint_for_current_mode(&self.op_mode) {
            Lookup::Found(name) => name,
            Lookup::ActiveProgram => schedule.active_program().map(str::to_string),
        }
    }

    pub fn target_temperature(&mut self) -> f64 {
        if self.op_mode.is_off() {
            self.target_temp = 0.0;
            return self.target_temp;
        }
        if let Some(key) = self.temp_setpoint() {
            let temp = self.number(key, "value").unwrap_or(0.0);
            if temp > 0.0 {
                self.target_temp = temp;
                return temp;
            }
        }
        let Some(schedule) = self.schedule.as_ref() else {
            return self.target_temp;
        };
        let temp = match schedule.temp_for_current_mode(&self.op_mode) {
            Lookup::Found(t) => t,
            Lookup::ActiveProgram => self.value_from_active_setpoint("value"),
        };
        if temp >= 0.0 {
            self.target_temp = temp;
        }
        self.target_temp
    }

    pub fn min_temp(&self) -> f64 {
        self.bound(Bound::Min)
    }

    pub fn max_temp(&self) -> f64 {
        self.bound(Bound::Max)
    }

    fn bound(&self, bound: Bound) -> f64 {
        let (field, bound_ref, default) = match bound {
            Bound::Min => ("minValue", &self.schema.min_ref, DEFAULT_MIN_TEMP),
            Bound::Max => ("maxValue", &self.schema.max_ref, DEFAULT_MAX_TEMP),
        };
        if self.op_mode.is_off() {
            return default;
        }
        let fallback = self
            .temp_setpoint()
            .and_then(|key| self.number(key, field))
            .or_else(|| bound_ref.as_deref().and_then(|r| self.number(r, "value")));
        let Some(schedule) = self.schedule.as_ref() else {
            return fallback.unwrap_or(default);
        };
        match schedule.min_max_for_mode(bound, &self.op_mode, fallback) {
            Lookup::Found(v) => v,
            Lookup::ActiveProgram => self.value_from_active_setpoint(field),
        }
    }

    fn in_range(&self, temperature: f64) -> bool {
        let (min, max) = (self.min_temp(), self.max_temp());
        if self.schema.inclusive_bounds {
            min <= temperature && temperature <= max
        } else {
            min < temperature && temperature < max
        }
    }

    fn write_target(&self) -> Option<WriteTarget> {
        let uri_of = |key: &str| self.data.get(key).map(|p| p.uri.clone());

        if self.op_mode.is_auto()
            && let Some(mo) = &self.schema.manual_override
        {
            return Some(WriteTarget::Override {
                uri: uri_of(&mo.value_ref)?,
                status_uri: uri_of(&mo.status_ref)?,
            });
        }
        if let Some(key) = self.op_mode.setpoint_property(None, true) {
            return Some(WriteTarget::Direct {
                uri: uri_of(key)?,
                cache_key: self.temp_setpoint().map(str::to_string),
            });
        }
        if !self.op_mode.is_auto() {
            return None;
        }
        match self.schedule.as_ref()?.uri_for_current_mode(&self.op_mode) {
            Lookup::Found(uri) => Some(WriteTarget::Schedule { uri: uri? }),
            Lookup::ActiveProgram => {
                let key = self.active_program_setpoint()?;
                Some(WriteTarget::ActiveProgram {
                    uri: uri_of(&key)?,
                    cache_key: key,
                })
            }
        }
    }

    /// Changes the temperature the circuit currently aims for.
    ///
    /// Returns `Ok(false)` without touching the device when the circuit is
    /// off, the value is already set, or it lies outside the bounds.
    pub async fn set_temperature(&mut self, temperature: f64) -> Result<bool> {
        if self.op_mode.is_off() {
            warn!(circuit = %self.name, "circuit is off, not setting temperature");
            return Ok(false);
        }
        let target = self.target_temperature();
        if target == temperature {
            debug!(circuit = %self.name, temperature, "temperature already set");
            return Ok(false);
        }
        if !self.in_range(temperature) {
            warn!(
                circuit = %self.name,
                temperature,
                min = self.min_temp(),
                max = self.max_temp(),
                "temperature out of range"
            );
            return Ok(false);
        }
        let Some(write) = self.write_target() else {
            debug!(circuit = %self.name, "no property to write the temperature to");
            return Ok(false);
        };

        let uri = match &write {
            WriteTarget::Direct { uri, .. }
            | WriteTarget::Override { uri, .. }
            | WriteTarget::Schedule { uri }
            | WriteTarget::ActiveProgram { uri, .. } => uri.clone(),
        };
        let ok = self.device.put(&uri, json!(temperature)).await?;
        if let WriteTarget::Override { status_uri, .. } = &write {
            self.device.put(status_uri, json!("on")).await?;
        }
        debug!(circuit = %self.name, temperature, ok, "set temperature");
        if !ok {
            return Ok(false);
        }

        match write {
            WriteTarget::Direct { cache_key: Some(key), .. }
            | WriteTarget::ActiveProgram { cache_key: key, .. } => self.cache_value(&key, temperature),
            WriteTarget::Schedule { .. } => {
                if let Some(schedule) = self.schedule.as_mut() {
                    schedule.cache_temp_for_mode(&self.op_mode, temperature);
                }
            }
            WriteTarget::Direct { cache_key: None, .. } | WriteTarget::Override { .. } => {}
        }
        self.target_temp = temperature;
        Ok(true)
    }

    fn cache_value(&mut self, key: &str, value: f64) {
        let Some(prop) = self.data.get_mut(key) else {
            return;
        };
        match prop.result.as_object_mut() {
            Some(obj) => {
                obj.insert("value".to_string(), json!(value));
            }
            None => prop.result = json!({ "value": value }),
        }
    }

    /// Switches the operation mode. `Ok(None)` when nothing was written.
    pub async fn set_operation_mode(&mut self, new_mode: &str) -> Result<Option<String>> {
        if self.op_mode.current_mode() == new_mode {
            warn!(circuit = %self.name, mode = new_mode, "already in requested mode");
            return Ok(None);
        }
        if !self.op_mode.available_modes().contains(&new_mode) {
            warn!(circuit = %self.name, mode = new_mode, "mode not available");
            return Ok(None);
        }
        let Some(uri) = self.op_mode.uri().map(str::to_string) else {
            return Err(Error::NotSupported(format!("{} has not read its operation mode", self.name)));
        };
        if !self.device.put(&uri, json!(new_mode)).await? {
            return Ok(None);
        }
        self.op_mode.set_mode(new_mode);
        Ok(Some(new_mode.to_string()))
    }

    /// Switches the active program and reloads the schedule for it.
    pub async fn set_preset_mode(&mut self, preset: &str) -> Result<bool> {
        let Some(prop) = self.data.get(ACTIVE_PROGRAM) else {
            return Err(Error::NotSupported(format!("{} has no programs", self.name)));
        };
        let result = &prop.result;
        let allowed = result
            .get("allowedValues")
            .and_then(Value::as_array)
            .is_some_and(|v| v.iter().any(|p| p.as_str() == Some(preset)));
        let writeable = result.get("writeable").and_then(as_flag).unwrap_or(false);
        if !allowed || !writeable {
            warn!(circuit = %self.name, preset, "program not available");
            return Ok(false);
        }
        if result.get("value").and_then(Value::as_str) == Some(preset) {
            return Ok(false);
        }
        let uri = prop.uri.clone();
        if !self.device.put(&uri, json!(preset)).await? {
            return Ok(false);
        }
        self.update_requested_key(ACTIVE_PROGRAM).await?;
        self.update_schedule().await;
        Ok(true)
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_flag(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    }
}
