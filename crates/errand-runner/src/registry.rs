//! Which session owns which browser.
//!
//! Every execution pass acquires its own driver under its session id and
//! releases it when done. A second acquisition of a live id is refused.

use std::collections::HashMap;
use std::sync::Arc;

use errand_agent::{Launcher, PageDriver};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{Error, Result};

enum Slot<D> {
    /// Reserved while the browser starts
    Launching,
    Live(Arc<D>),
}

pub struct SessionRegistry<L: Launcher> {
    launcher: L,
    slots: Mutex<HashMap<String, Slot<L::Driver>>>,
}

impl<L: Launcher> SessionRegistry<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Launch a browser for `id`. Fails if `id` already has one.
    pub async fn acquire(&self, id: &str) -> Result<Arc<L::Driver>> {
        {
            let mut slots = self.slots.lock().await;
            if slots.contains_key(id) {
                return Err(Error::SessionBusy(id.to_string()));
            }
            slots.insert(id.to_string(), Slot::Launching);
        }

        debug!(session = %id, "launching browser");
        match self.launcher.launch().await {
            Ok(driver) => {
                let driver = Arc::new(driver);
                self.slots
                    .lock()
                    .await
                    .insert(id.to_string(), Slot::Live(Arc::clone(&driver)));
                Ok(driver)
            }
            Err(e) => {
                self.slots.lock().await.remove(id);
                Err(e.into())
            }
        }
    }

    /// The live driver for `id`, if any.
    pub async fn get(&self, id: &str) -> Option<Arc<L::Driver>> {
        match self.slots.lock().await.get(id) {
            Some(Slot::Live(driver)) => Some(Arc::clone(driver)),
            _ => None,
        }
    }

    /// Forget `id` and close its browser.
    pub async fn release(&self, id: &str) {
        let slot = self.slots.lock().await.remove(id);
        if let Some(Slot::Live(driver)) = slot {
            debug!(session = %id, "closing browser");
            if let Err(e) = driver.close().await {
                warn!(session = %id, "failed to close browser: {}", e);
            }
        }
    }

    /// Ids holding or starting a browser, sorted.
    pub async fn live_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slots.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
