#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use brewlink_protocol::{Command, DeviceFamily, RecipeStep, Reply, SessionId, Verb};
use libbrewlink::{
    Dispatcher, FsStorage, RecordStorage, RegisterPolicy, SessionEvents, SessionStore,
    StaticFirmware, StaticRecipeBook,
};
use tempfile::TempDir;

pub const RECIPE: &str = "PAK0001";

pub struct Harness {
    pub storage: Arc<dyn RecordStorage>,
    pub store: Arc<SessionStore>,
    pub dispatcher: Arc<Dispatcher>,
}

pub fn steps() -> Vec<RecipeStep> {
    vec![
        RecipeStep {
            name: "Preheat".to_string(),
            temp_c: 40.0,
            minutes: 5,
            drain: false,
        },
        RecipeStep {
            name: "Mash".to_string(),
            temp_c: 66.0,
            minutes: 60,
            drain: false,
        },
        RecipeStep {
            name: "Boil".to_string(),
            temp_c: 100.0,
            minutes: 60,
            drain: true,
        },
    ]
}

pub fn harness(dir: &TempDir, policy: RegisterPolicy) -> Harness {
    let storage: Arc<dyn RecordStorage> =
        Arc::new(FsStorage::open(dir.path()).expect("open storage"));
    harness_with(storage, policy, Duration::from_secs(30))
}

pub fn harness_with(
    storage: Arc<dyn RecordStorage>,
    policy: RegisterPolicy,
    lock_timeout: Duration,
) -> Harness {
    let store = Arc::new(SessionStore::new(
        storage.clone(),
        lock_timeout,
        SessionEvents::new(64),
    ));
    let recipes = StaticRecipeBook::new().with(RECIPE, steps());
    let firmware = StaticFirmware::new().with(DeviceFamily::Pico, "0.1.34");
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        Arc::new(recipes),
        Arc::new(firmware),
        policy,
    ));
    Harness {
        storage,
        store,
        dispatcher,
    }
}

pub fn command(device: &str, session_id: Option<&str>, verb: Verb) -> Command {
    Command {
        device_id: device.to_string(),
        family: DeviceFamily::Pico,
        firmware_version: Some("0.1.11".to_string()),
        session_id: session_id.map(str::to_string),
        verb,
    }
}

pub fn register_verb(force: bool) -> Verb {
    Verb::Register {
        recipe: RECIPE.to_string(),
        force,
    }
}

pub async fn register(h: &Harness, device: &str) -> SessionId {
    match h
        .dispatcher
        .dispatch(command(device, None, register_verb(false)))
        .await
        .expect("register")
    {
        Reply::Session { session_id, .. } => session_id,
        other => panic!("unexpected reply {other:?}"),
    }
}
