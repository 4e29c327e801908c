// ── Domain model ──

pub mod bthome;
pub mod device;
pub mod home;
pub mod ids;

pub use bthome::{BluEvent, BluInfo, CAPABILITY_ORDER};
pub use device::{Addressable, Device, DeviceKind, SHELLY};
pub use home::{ComfortRange, Group, KindSchedule, Room, TemperatureConfig, WeekdayDefault};
pub use ids::{MacAddress, blu_id, is_shelly_id, normalize_id};
