//! Recognized description-file variables and the immutable per-pass [`VariableStore`].
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
};

/// The closed set of variables the tree tracks. Anything else an evaluator encounters stays
/// private to that evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Variable {
    Template,
    Target,
    DestDir,
    Config,
    Qt,
    Defines,
    IncludePath,
    CppFlags,
    LibDirectories,
    UiDir,
    MocDir,
    ObjectsDir,
    ObjectExt,
    Makefile,
    Version,
    TargetExt,
    PkgConfig,
    PrecompiledHeader,
    QmlImportPath,
    Installs,
    QmakeProjectName,
    QmakeCc,
    QmakeCxx,
}

impl Variable {
    pub const ALL: [Variable; 23] = [
        Variable::Template,
        Variable::Target,
        Variable::DestDir,
        Variable::Config,
        Variable::Qt,
        Variable::Defines,
        Variable::IncludePath,
        Variable::CppFlags,
        Variable::LibDirectories,
        Variable::UiDir,
        Variable::MocDir,
        Variable::ObjectsDir,
        Variable::ObjectExt,
        Variable::Makefile,
        Variable::Version,
        Variable::TargetExt,
        Variable::PkgConfig,
        Variable::PrecompiledHeader,
        Variable::QmlImportPath,
        Variable::Installs,
        Variable::QmakeProjectName,
        Variable::QmakeCc,
        Variable::QmakeCxx,
    ];

    /// Spelling of the variable inside a description file.
    pub fn name(&self) -> &'static str {
        match self {
            Variable::Template => "TEMPLATE",
            Variable::Target => "TARGET",
            Variable::DestDir => "DESTDIR",
            Variable::Config => "CONFIG",
            Variable::Qt => "QT",
            Variable::Defines => "DEFINES",
            Variable::IncludePath => "INCLUDEPATH",
            Variable::CppFlags => "QMAKE_CXXFLAGS",
            Variable::LibDirectories => "LIBS",
            Variable::UiDir => "UI_DIR",
            Variable::MocDir => "MOC_DIR",
            Variable::ObjectsDir => "OBJECTS_DIR",
            Variable::ObjectExt => "QMAKE_EXT_OBJ",
            Variable::Makefile => "MAKEFILE",
            Variable::Version => "VERSION",
            Variable::TargetExt => "TARGET_EXT",
            Variable::PkgConfig => "PKGCONFIG",
            Variable::PrecompiledHeader => "PRECOMPILED_HEADER",
            Variable::QmlImportPath => "QML_IMPORT_PATH",
            Variable::Installs => "INSTALLS",
            Variable::QmakeProjectName => "QMAKE_PROJECT_NAME",
            Variable::QmakeCc => "QMAKE_CC",
            Variable::QmakeCxx => "QMAKE_CXX",
        }
    }

    pub fn from_name(name: &str) -> Option<Variable> {
        Variable::ALL.iter().copied().find(|v| v.name() == name)
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Resolved values of the recognized variables for one node and one pass.
///
/// Built once by an evaluator through [`VariableStore::builder`] and never mutated
/// afterwards; the tree replaces the whole store on every accepted evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableStore(BTreeMap<Variable, Vec<String>>);

impl VariableStore {
    pub fn builder() -> VariableStoreBuilder {
        VariableStoreBuilder::default()
    }

    pub fn get(&self, var: Variable) -> Option<&[String]> {
        self.0.get(&var).map(|v| v.as_slice())
    }

    /// Values of `var`, empty when unset.
    pub fn values(&self, var: Variable) -> &[String] {
        self.get(var).unwrap_or(&[])
    }

    /// First value of a variable, the convention for single-valued variables.
    pub fn single(&self, var: Variable) -> Option<&str> {
        self.get(var).and_then(|v| v.first()).map(|s| s.as_str())
    }

    pub fn contains_value(&self, var: Variable, value: &str) -> bool {
        self.values(var).iter().any(|v| v == value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Variable, &[String])> {
        self.0.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct VariableStoreBuilder(BTreeMap<Variable, Vec<String>>);

impl VariableStoreBuilder {
    pub fn set(mut self, var: Variable, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.0.insert(var, values.into_iter().map(Into::into).collect());
        self
    }

    pub fn insert(&mut self, var: Variable, values: Vec<String>) {
        self.0.insert(var, values);
    }

    pub fn build(self) -> VariableStore {
        VariableStore(self.0)
    }
}

/// Kind of build artifact a node describes, derived from `TEMPLATE` (and `CONFIG`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProjectType {
    #[default]
    Invalid,
    Application,
    StaticLibrary,
    SharedLibrary,
    Script,
    Aux,
    Subdirs,
}

impl ProjectType {
    pub fn from_variables(store: &VariableStore) -> ProjectType {
        match store.single(Variable::Template) {
            Some("app") | Some("vcapp") => ProjectType::Application,
            Some("lib") | Some("vclib") => {
                if store.contains_value(Variable::Config, "staticlib")
                    || store.contains_value(Variable::Config, "static")
                {
                    ProjectType::StaticLibrary
                } else {
                    ProjectType::SharedLibrary
                }
            }
            Some("subdirs") | Some("vcsubdirs") => ProjectType::Subdirs,
            Some("aux") => ProjectType::Aux,
            Some("script") => ProjectType::Script,
            _ => ProjectType::Invalid,
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, ProjectType::Invalid)
    }

    /// Types that produce a build target of their own.
    pub fn has_target(&self) -> bool {
        matches!(
            self,
            ProjectType::Application | ProjectType::StaticLibrary | ProjectType::SharedLibrary
        )
    }
}
