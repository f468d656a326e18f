use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use tracing::debug;

use crate::{load_spec, validate_spec, SpecError, WmSpec};

/// Resolves the `spec_ref` carried by an element into a workload specification.
pub trait SpecSource: Send + Sync {
    fn load(&self, spec_ref: &str) -> Result<WmSpec, SpecError>;
}

/// Specs stored as `<dir>/<spec_ref>.yaml`.
#[derive(Clone, Debug)]
pub struct FsSpecSource {
    pub dir: PathBuf,
}

impl FsSpecSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Copy a spec into the source directory under its own name.
    pub fn install(&self, spec: &WmSpec) -> Result<PathBuf, SpecError> {
        let path = self.dir.join(format!("{}.yaml", spec.name));
        let io_err = |source| SpecError::Io {
            path: path.display().to_string(),
            source,
        };
        std::fs::create_dir_all(&self.dir).map_err(io_err)?;
        let yaml = serde_yaml::to_string(spec)?;
        std::fs::write(&path, yaml).map_err(io_err)?;
        Ok(path)
    }
}

impl SpecSource for FsSpecSource {
    fn load(&self, spec_ref: &str) -> Result<WmSpec, SpecError> {
        if spec_ref.contains('/') || spec_ref.contains("..") {
            return Err(SpecError::NotFound(spec_ref.to_string()));
        }
        let path = self.dir.join(format!("{spec_ref}.yaml"));
        if !path.exists() {
            return Err(SpecError::NotFound(spec_ref.to_string()));
        }
        debug!(spec = spec_ref, path = %path.display(), "loading spec");
        load_spec(&path)
    }
}

/// In-process spec registry.
#[derive(Default)]
pub struct StaticSpecSource {
    specs: RwLock<HashMap<String, WmSpec>>,
}

impl StaticSpecSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, spec: WmSpec) -> Result<(), SpecError> {
        validate_spec(&spec)?;
        let mut specs = self.specs.write().unwrap_or_else(|e| e.into_inner());
        specs.insert(spec.name.clone(), spec);
        Ok(())
    }
}

impl SpecSource for StaticSpecSource {
    fn load(&self, spec_ref: &str) -> Result<WmSpec, SpecError> {
        let specs = self.specs.read().unwrap_or_else(|e| e.into_inner());
        specs.get(spec_ref).cloned().ok_or_else(|| SpecError::NotFound(spec_ref.to_string()))
    }
}
