use std::sync::Arc;

use crate::config::ForwarderConfig;

/// One accepted configuration and the number it runs under.
///
/// Generations are numbered from 1 and replaced wholesale on reload. Components built for a
/// generation keep their own copy of it, so work started under one generation finishes under it.
#[derive(Debug)]
pub struct Generation {
    pub id: u64,
    pub config: Arc<ForwarderConfig>,
}

impl Generation {
    pub fn new(id: u64, config: ForwarderConfig) -> Self {
        Self {
            id,
            config: Arc::new(config),
        }
    }

    pub fn next(&self, config: ForwarderConfig) -> Self {
        Self::new(self.id + 1, config)
    }
}
