//! 数据模型

mod enums;
mod kit;
mod login;

pub use enums::{GeocodeState, SequencingStatus};
pub use kit::{Barcode, BarcodeStatusUpdate, HandoutKit, Kit, KitCredentials, KitDraft};
pub use login::{GeoPoint, GeocodeUpdate, Login, NewLogin, normalize_email};
