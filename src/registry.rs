use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::GrabError;
use crate::grabber::{Grabber, GrabberConfig};
use crate::remote::RemoteRepoClient;
use crate::workdir::WorkDirProvider;

/// Named grabber declarations. Build one per process and pass it to whatever
/// assembles a pipeline.
#[derive(Debug, Clone, Default)]
pub struct GrabberRegistry {
    entries: BTreeMap<String, GrabberConfig>,
}

impl GrabberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and adds `config`. Names are unique.
    pub fn register(&mut self, config: GrabberConfig) -> Result<(), GrabError> {
        config.validate()?;
        if self.entries.contains_key(&config.name) {
            return Err(GrabError::Configuration(format!(
                "grabber {} is already registered",
                config.name
            )));
        }
        self.entries.insert(config.name.clone(), config);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&GrabberConfig> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn configs(&self) -> impl Iterator<Item = &GrabberConfig> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn build<C: RemoteRepoClient>(
        &self,
        name: &str,
        client: Option<C>,
        workdirs: Arc<dyn WorkDirProvider>,
    ) -> Result<Grabber<C>, GrabError> {
        let config = self
            .get(name)
            .ok_or_else(|| GrabError::Configuration(format!("unknown grabber {name}")))?;
        Grabber::new(config, client, workdirs)
    }
}
