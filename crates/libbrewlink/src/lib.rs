pub mod archive;
pub mod broker;
pub mod dispatch;
pub mod error;
pub mod firmware;
pub mod locks;
pub mod recipe;
pub mod recovery;
pub mod redact;
pub mod session;
pub mod storage;
pub mod store;

pub use archive::ArchivalManager;
pub use broker::SessionEvents;
pub use dispatch::{Dispatcher, RegisterPolicy};
pub use error::BrewError;
pub use firmware::{FirmwareCatalog, StaticFirmware};
pub use locks::{DeviceGuard, DeviceHandle, DeviceSlot, LockRegistry};
pub use recipe::{DirRecipeBook, RecipeBook, StaticRecipeBook};
pub use recovery::{RecoveryReport, recover};
pub use redact::{DeviceId, redact};
pub use session::{LogEntry, LogEvent, SCHEMA_VERSION, Session};
pub use storage::{FsStorage, RecordStorage, StorageError, TempSweep};
pub use store::SessionStore;
