//! How a target is produced

use serde::{Deserialize, Serialize};

/// Command execution settings for a derived target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecSpec {
    /// Execution environment identifier (a container image)
    pub environment: String,
    /// Command run inside the environment
    pub command: String,
    /// Path the command writes its output to, if not the target path
    pub output_path: Option<String>,
}

impl ExecSpec {
    /// Where the step's output is extracted from, given its target path
    pub fn output_for<'a>(&'a self, target: &'a str) -> &'a str {
        match self.output_path.as_deref() {
            Some(path) if !path.is_empty() => path,
            _ => target,
        }
    }
}

/// Build metadata attached to every target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum Recipe {
    /// A file read from the project tree
    Source,
    /// A file produced by running a command in an isolated environment
    Exec(ExecSpec),
}

impl Recipe {
    /// A source file
    pub fn source() -> Self {
        Self::Source
    }

    /// A derived file built by `command` inside `environment`
    pub fn exec(environment: impl Into<String>, command: impl Into<String>) -> Self {
        Self::Exec(ExecSpec {
            environment: environment.into(),
            command: command.into(),
            output_path: None,
        })
    }

    /// Set an explicit output path (no effect on source recipes)
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        if let Self::Exec(ref mut spec) = self {
            spec.output_path = Some(output.into());
        }
        self
    }

    /// Whether this is a source file
    pub fn is_source(&self) -> bool {
        matches!(self, Self::Source)
    }

    /// Execution settings for derived targets
    pub fn exec_spec(&self) -> Option<&ExecSpec> {
        match self {
            Self::Source => None,
            Self::Exec(spec) => Some(spec),
        }
    }
}

/// One target record as supplied by a build file loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    /// Unique target path
    pub target: String,
    /// How the target is produced
    pub recipe: Recipe,
    /// Static dependency target paths, in declaration order
    pub dependencies: Vec<String>,
}

impl BuildSpec {
    /// A source file target
    pub fn source(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            recipe: Recipe::source(),
            dependencies: Vec::new(),
        }
    }

    /// A derived target built by `command` inside `environment`
    pub fn derived(
        target: impl Into<String>,
        environment: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            recipe: Recipe::exec(environment, command),
            dependencies: Vec::new(),
        }
    }

    /// Append static dependencies
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Set an explicit output path
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.recipe = self.recipe.with_output(output);
        self
    }
}
