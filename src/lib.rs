mod cipher;
mod circuit;
mod connector;
mod device;
mod error;
mod http;
mod logger;
mod opmode;
mod protocol;
mod schedule;
mod schema;
mod types;

pub use cipher::{Cipher, DecryptError};
pub use circuit::{Circuit, Property, DEFAULT_MAX_TEMP, DEFAULT_MIN_TEMP};
pub use connector::{
    Connector, ConnectorBuilder, Inbound, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_WRITE_TIMEOUT,
};
pub use device::{Device, Transport};
pub use error::{Error, Result};
pub use http::{HttpConnector, HttpConnectorBuilder};
pub use logger::MessageLogMode;
pub use opmode::{ModeEntry, ModeTable, OperationMode};
pub use protocol::{build_frame, FrameStyle};
pub use schedule::{
    active_switch_point, parse_device_time, Schedule, SwitchPoint, DEFAULT_MAX_HC_TEMP,
    DEFAULT_MIN_HC_TEMP,
};
pub use schema::{CircuitSchema, ManualOverride, PropertyKind, PropertyRef, ScheduleDef};
pub use types::*;
