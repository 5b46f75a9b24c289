//! Runtime context
//!
//! The pieces of the surrounding application the storage layer relies on:
//! configuration (including the working directory) and a background task
//! runner for listener notifications. Logging goes through `tracing`.

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::Result;

/// Shared runtime context
pub struct Context {
    config: Config,
    dispatcher: Dispatcher,
}

impl Context {
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let dispatcher = Dispatcher::new("shelfdb-dispatch")?;
        Ok(Arc::new(Self { config, dispatcher }))
    }

    /// Context with default configuration rooted at `working_dir`
    pub fn with_working_dir(working_dir: &Path) -> Result<Arc<Self>> {
        Self::new(Config::builder().working_dir(working_dir).build())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn working_dir(&self) -> &Path {
        &self.config.working_dir
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Wait until all pending notifications were delivered
    pub fn flush_notifications(&self) {
        self.dispatcher.flush();
    }
}
