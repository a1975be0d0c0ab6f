use crate::{blob::BlobStore, event::Category};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

pub const KEY_SETTINGS: &str = "settings";

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Settings {
    pub max_history: usize,
    /// Categories tracked as start/stop activities.
    pub toggleable: BTreeSet<Category>,
}

impl Settings {
    pub fn is_toggleable(&self, category: Category) -> bool {
        self.toggleable.contains(&category)
    }

    fn sanitized(mut self) -> Self {
        self.max_history = self.max_history.max(1);
        self
    }
}

/// Persisted settings win over `defaults`; the result is written back when it
/// had to be fixed up or did not exist yet.
pub fn load_or_init_settings(
    blobs: &mut impl BlobStore,
    defaults: Settings,
) -> anyhow::Result<Settings> {
    if let Some(raw) = blobs.get(KEY_SETTINGS)? {
        match serde_json::from_str::<Settings>(&raw) {
            Ok(settings) => {
                let fixed = settings.clone().sanitized();
                if fixed != settings {
                    save_settings(blobs, &fixed)?;
                }
                return Ok(fixed);
            }
            Err(err) => warn!("stored settings are malformed, using defaults: {err}"),
        }
    }

    let fixed = defaults.sanitized();
    save_settings(blobs, &fixed)?;
    Ok(fixed)
}

pub fn save_settings(blobs: &mut impl BlobStore, settings: &Settings) -> anyhow::Result<()> {
    blobs.set(KEY_SETTINGS, &serde_json::to_string(settings)?)
}
