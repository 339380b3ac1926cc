//! Process-wide state of the runner service.

use crate::store::Store;
use crate::worker::WorkerPool;
use crate::Config;

use once_cell::sync::OnceCell;

/// The long-lived modules of one runner process, installed once at startup
/// and shared by the HTTP handlers and the worker pool.
pub struct App {
    pub config: Config,
    pub store: Store,
    pub pool: WorkerPool,
}

static APP: OnceCell<App> = OnceCell::new();

impl App {
    pub fn install(self) {
        if APP.set(self).is_err() {
            panic!("runner app state has already been installed")
        }
    }

    pub fn get() -> &'static App {
        APP.get().expect("runner app state is not installed")
    }
}
