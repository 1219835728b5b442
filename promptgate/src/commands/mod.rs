// promptgate/src/commands/mod.rs
//! Command implementations. Each command builds what it needs from the
//! resolved scanner configuration and returns a process exit code.

pub mod datasets;
pub mod scan;
pub mod stats;

use std::sync::Arc;

use anyhow::Result;
use promptgate_core::{RegistryHandle, ReloadController, RuleRegistry, ScannerConfig};

/// Builds a registry handle and populates it through the reload controller,
/// so the CLI exercises the same load path as a running service.
pub fn build_registry(config: &ScannerConfig) -> Result<Arc<RegistryHandle>> {
    let handle = Arc::new(RegistryHandle::new(RuleRegistry::empty()));
    let controller = ReloadController::new(config.clone(), Arc::clone(&handle))?;
    controller.reload()?;
    Ok(handle)
}
