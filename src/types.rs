use std::fmt;

use chrono::Weekday;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a circuit does while in a given operation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    Off,
    Manual,
    Auto,
}

/// Day tags as the gateway writes them in switch points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Day {
    Mo,
    Tu,
    We,
    Th,
    Fr,
    Sa,
    Su,
}

impl Day {
    pub const ALL: [Day; 7] = [Day::Mo, Day::Tu, Day::We, Day::Th, Day::Fr, Day::Sa, Day::Su];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            Day::Mo => "Mo",
            Day::Tu => "Tu",
            Day::We => "We",
            Day::Th => "Th",
            Day::Fr => "Fr",
            Day::Sa => "Sa",
            Day::Su => "Su",
        }
    }

    /// Accepts both the short tags and full lowercase day names.
    pub fn from_tag(s: &str) -> Option<Self> {
        match s {
            "Mo" | "monday" => Some(Day::Mo),
            "Tu" | "tuesday" => Some(Day::Tu),
            "We" | "wednesday" => Some(Day::We),
            "Th" | "thursday" => Some(Day::Th),
            "Fr" | "friday" => Some(Day::Fr),
            "Sa" | "saturday" => Some(Day::Sa),
            "Su" | "sunday" => Some(Day::Su),
            _ => None,
        }
    }
}

impl From<Weekday> for Day {
    fn from(w: Weekday) -> Self {
        Day::ALL[w.num_days_from_monday() as usize]
    }
}

/// How switch points refer to temperatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    /// Switch points name a temperature level fetched separately.
    #[default]
    Levels,
    /// Switch points carry the temperature itself.
    Absolute,
}

impl ScheduleMode {
    pub fn from_device_str(s: &str) -> Option<Self> {
        match s {
            "levels" => Some(ScheduleMode::Levels),
            "absolute" => Some(ScheduleMode::Absolute),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BusType {
    #[default]
    Ems,
    Can,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetpointEntry {
    pub name: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub uri: Option<String>,
}

/// Answer of a schedule lookup.
///
/// `ActiveProgram` means the schedule cannot answer and the caller should read
/// the property belonging to the circuit's active program instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    ActiveProgram,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(v) => Some(v),
            Lookup::ActiveProgram => None,
        }
    }
}
