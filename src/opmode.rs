use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::types::Behavior;

/// Mode name -> behavior and setpoint properties for that mode.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ModeTable(HashMap<String, ModeEntry>);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModeEntry {
    #[serde(rename = "type")]
    pub behavior: Behavior,
    #[serde(default)]
    pub setpoint: Option<String>,
    /// Property to write the setpoint to, when it differs from `setpoint`.
    #[serde(default)]
    pub setpoint_write: Option<String>,
}

impl ModeTable {
    pub fn get(&self, mode: &str) -> Option<&ModeEntry> {
        self.0.get(mode)
    }

    pub fn modes(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl FromIterator<(String, ModeEntry)> for ModeTable {
    fn from_iter<I: IntoIterator<Item = (String, ModeEntry)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Interprets the operation mode a circuit reported last.
///
/// Does no I/O; the owning circuit fetches the mode property and hands the
/// result over with [`OperationMode::init`].
#[derive(Debug, Clone)]
pub struct OperationMode {
    table: Arc<ModeTable>,
    current: Option<String>,
    allowed: Vec<String>,
    uri: Option<String>,
}

impl OperationMode {
    pub fn new(table: Arc<ModeTable>) -> Self {
        Self {
            table,
            current: None,
            allowed: Vec::new(),
            uri: None,
        }
    }

    pub fn init(&mut self, result: &Value, uri: &str) {
        self.current = result.get("value").and_then(Value::as_str).map(str::to_string);
        self.allowed = result
            .get("allowedValues")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        self.uri = Some(uri.to_string());
    }

    pub fn is_set(&self) -> bool {
        self.uri.is_some()
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn table(&self) -> &ModeTable {
        &self.table
    }

    /// Empty until the mode has been read.
    pub fn current_mode(&self) -> &str {
        self.current.as_deref().unwrap_or_default()
    }

    pub fn behavior(&self) -> Option<Behavior> {
        self.table.get(self.current_mode()).map(|e| e.behavior)
    }

    pub fn is_off(&self) -> bool {
        self.behavior() == Some(Behavior::Off)
    }

    pub fn is_manual(&self) -> bool {
        self.behavior() == Some(Behavior::Manual)
    }

    pub fn is_auto(&self) -> bool {
        self.behavior() == Some(Behavior::Auto)
    }

    /// Property holding the setpoint for `mode` (current mode when `None`).
    ///
    /// With `for_write`, a dedicated write property wins when configured.
    pub fn setpoint_property(&self, mode: Option<&str>, for_write: bool) -> Option<&str> {
        let mode = mode.unwrap_or(self.current_mode());
        let entry = self.table.get(mode)?;
        if for_write && let Some(write) = &entry.setpoint_write {
            return Some(write.as_str());
        }
        entry.setpoint.as_deref()
    }

    /// Modes the device accepts; every known mode until the device said so.
    pub fn available_modes(&self) -> Vec<&str> {
        if self.allowed.is_empty() {
            let mut modes: Vec<&str> = self.table.modes().collect();
            modes.sort_unstable();
            return modes;
        }
        self.allowed.iter().map(String::as_str).collect()
    }

    pub fn find_in_available_modes<'a>(&self, modes: &[&'a str]) -> Option<&'a str> {
        let available = self.available_modes();
        modes.iter().copied().find(|m| available.contains(m))
    }

    pub fn set_mode(&mut self, new_mode: &str) {
        self.current = Some(new_mode.to_string());
    }
}
