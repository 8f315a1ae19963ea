//! Tunnel manager selection

use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;

use od_core::config::TunnelBinaries;
use od_core::traits::{ManagerBinder, TunnelManager};
use od_core::TunnelStartError;
use od_protocol::TunnelGeneration;

use super::process::ProcessTunnelManager;

/// Hands out one long-lived process manager per generation
///
/// Managers are kept so that a plan opened at job setup is still known when
/// the same job tears down.
pub struct ProcessManagerFactory {
    binaries: TunnelBinaries,
    working_dir: Option<PathBuf>,
    managers: DashMap<TunnelGeneration, Arc<ProcessTunnelManager>>,
}

impl ProcessManagerFactory {
    /// Create a factory for binaries in `binaries`
    pub fn new(binaries: TunnelBinaries, working_dir: Option<PathBuf>) -> Self {
        Self {
            binaries,
            working_dir,
            managers: DashMap::new(),
        }
    }

    /// Locate the Java runtime the legacy tunnel needs
    fn resolve_java(&self) -> Result<PathBuf, TunnelStartError> {
        let unavailable = |reason: String| TunnelStartError::ManagerUnavailable {
            generation: TunnelGeneration::Legacy,
            reason,
        };

        match &self.binaries.java_path {
            Some(path) if path.is_file() => Ok(path.clone()),
            Some(path) => Err(unavailable(format!(
                "Java runtime {} does not exist",
                path.display()
            ))),
            None => which::which("java")
                .map_err(|e| unavailable(format!("Java runtime not found on PATH: {}", e))),
        }
    }
}

impl ManagerBinder for ProcessManagerFactory {
    fn bind(&self, generation: TunnelGeneration) -> Result<Arc<dyn TunnelManager>, TunnelStartError> {
        if let Some(existing) = self.managers.get(&generation) {
            let manager: Arc<ProcessTunnelManager> = Arc::clone(&existing);
            return Ok(manager);
        }

        let manager = match generation {
            TunnelGeneration::Current => {
                ProcessTunnelManager::current(self.binaries.clone(), self.working_dir.clone())
            }
            TunnelGeneration::Legacy => ProcessTunnelManager::legacy(
                self.binaries.clone(),
                self.resolve_java()?,
                self.working_dir.clone(),
            ),
        };
        tracing::debug!("Bound {} tunnel manager", generation);

        let manager = Arc::clone(
            &self
                .managers
                .entry(generation)
                .or_insert_with(|| Arc::new(manager)),
        );
        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_always_binds() {
        let factory = ProcessManagerFactory::new(TunnelBinaries::default(), None);
        let manager = factory.bind(TunnelGeneration::Current).unwrap();
        assert_eq!(manager.generation(), TunnelGeneration::Current);

        let again = factory.for_generation(false).unwrap();
        assert_eq!(again.generation(), TunnelGeneration::Current);
        assert_eq!(factory.managers.len(), 1);
    }

    #[test]
    fn test_legacy_needs_java() {
        let dir = tempfile::tempdir().unwrap();
        let binaries = TunnelBinaries {
            java_path: Some(dir.path().join("no-java-here")),
            ..Default::default()
        };
        let factory = ProcessManagerFactory::new(binaries, None);

        let err = factory.bind(TunnelGeneration::Legacy).err().unwrap();
        assert!(matches!(
            err,
            TunnelStartError::ManagerUnavailable {
                generation: TunnelGeneration::Legacy,
                ..
            }
        ));
    }

    #[test]
    fn test_legacy_with_java() {
        let dir = tempfile::tempdir().unwrap();
        let java = dir.path().join("java");
        std::fs::write(&java, "").unwrap();
        let binaries = TunnelBinaries {
            java_path: Some(java),
            ..Default::default()
        };
        let factory = ProcessManagerFactory::new(binaries, None);

        let manager = factory.for_generation(true).unwrap();
        assert_eq!(manager.generation(), TunnelGeneration::Legacy);
    }
}
