use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::core::traits::host::{EnvironmentResolver, ResolveError, WorkingEnvironment};

/// Resolves the same working directory and environment for every source.
#[derive(Clone, Debug, Default)]
pub struct StaticEnvironmentResolver {
    environment: WorkingEnvironment,
}

impl StaticEnvironmentResolver {
    pub fn new(working_directory: Option<PathBuf>, environment: BTreeMap<String, String>) -> Self {
        StaticEnvironmentResolver {
            environment: WorkingEnvironment {
                working_directory,
                environment,
            },
        }
    }
}

impl EnvironmentResolver for StaticEnvironmentResolver {
    fn resolve(&self, source: &Path) -> Result<WorkingEnvironment, ResolveError> {
        if self.environment == WorkingEnvironment::default() {
            return Err(ResolveError::Unavailable(source.to_path_buf()));
        }
        Ok(self.environment.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_environment_is_unavailable() {
        let resolver = StaticEnvironmentResolver::default();
        assert!(matches!(
            resolver.resolve(Path::new("/bin/unit")),
            Err(ResolveError::Unavailable(_))
        ));
    }

    #[test]
    fn test_configured_environment_is_shared() {
        let resolver = StaticEnvironmentResolver::new(
            Some(PathBuf::from("/work")),
            [("LANG".to_string(), "C".to_string())].into(),
        );
        let a = resolver.resolve(Path::new("/bin/a")).unwrap();
        let b = resolver.resolve(Path::new("/bin/b")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.working_directory, Some(PathBuf::from("/work")));
    }
}
