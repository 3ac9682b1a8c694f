use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use super::{Compile, Execute, NativeCompiler, PassThroughCompiler, ShellRunner};
use crate::artifact::ArtifactStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    C,
    Cpp,
    Python,
    Go,
}

impl Language {
    pub const ALL: [Language; 4] = [Self::C, Self::Cpp, Self::Python, Self::Go];

    /// Name used on the wire and in submissions
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Python => "py",
            Self::Go => "go",
        }
    }

    /// Guesses the language from a source file extension
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "c" => Some(Self::C),
            "cc" | "cpp" | "cxx" => Some(Self::Cpp),
            "py" => Some(Self::Python),
            "go" => Some(Self::Go),
            _ => None,
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|lang| lang.as_str() == s)
            .ok_or_else(|| format!("unknown language {s:?}"))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiler and executer for each supported language, fixed at startup
#[derive(Default, Clone)]
pub struct Toolchains {
    compilers: HashMap<Language, Arc<dyn Compile>>,
    executers: HashMap<Language, Arc<dyn Execute>>,
}

impl Toolchains {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard registry.
    ///
    /// Go sources are accepted by the compiler stage but have no executer, so
    /// they end in `BAD_LANGUAGE` after compiling.
    pub fn standard(store: &ArtifactStore, filter: &Path) -> Self {
        Self::new()
            .with_compiler(Language::C, NativeCompiler::gcc(filter, store.clone()))
            .with_compiler(Language::Cpp, NativeCompiler::gpp(filter, store.clone()))
            .with_compiler(Language::Python, PassThroughCompiler::new("py", store.clone()))
            .with_compiler(Language::Go, PassThroughCompiler::new("go", store.clone()))
            .with_executer(Language::C, ShellRunner::native())
            .with_executer(Language::Cpp, ShellRunner::native())
            .with_executer(Language::Python, ShellRunner::interpreted("python3"))
    }

    pub fn with_compiler(mut self, language: Language, compiler: impl Compile + 'static) -> Self {
        self.compilers.insert(language, Arc::new(compiler));
        self
    }

    pub fn with_executer(mut self, language: Language, executer: impl Execute + 'static) -> Self {
        self.executers.insert(language, Arc::new(executer));
        self
    }

    /// Looks up the compiler for a language name as submitted
    pub fn compiler(&self, language: &str) -> Option<&dyn Compile> {
        let language = language.parse::<Language>().ok()?;
        self.compilers.get(&language).map(Arc::as_ref)
    }

    pub fn executer(&self, language: &str) -> Option<&dyn Execute> {
        let language = language.parse::<Language>().ok()?;
        self.executers.get(&language).map(Arc::as_ref)
    }

    /// Languages that can be both compiled and executed
    pub fn supported(&self) -> Vec<Language> {
        Language::ALL
            .into_iter()
            .filter(|l| self.compilers.contains_key(l) && self.executers.contains_key(l))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_names() {
        for lang in Language::ALL {
            assert_eq!(lang.as_str().parse::<Language>(), Ok(lang));
        }
        assert!("rust".parse::<Language>().is_err());
        assert_eq!(Language::from_extension("cc"), Some(Language::Cpp));
        assert_eq!(Language::from_extension("rs"), None);
    }

    #[test]
    fn test_standard_registry() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let toolchains = Toolchains::standard(&store, &dir.path().join("filter.c"));

        assert!(toolchains.compiler("c").is_some());
        assert!(toolchains.executer("cpp").is_some());
        assert!(toolchains.compiler("go").is_some());
        assert!(toolchains.executer("go").is_none());
        assert!(toolchains.compiler("brainfuck").is_none());
        assert_eq!(
            toolchains.supported(),
            vec![Language::C, Language::Cpp, Language::Python]
        );
    }
}
