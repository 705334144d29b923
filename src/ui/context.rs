//! Interactive vs plain output detection

use std::io::IsTerminal;

/// Environment variables that mark a CI runner
const CI_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "BUILDKITE",
    "JENKINS_URL",
    "TEAMCITY_VERSION",
    "TF_BUILD",
];

/// Decides how the CLI renders output and handles prompts
#[derive(Debug, Clone)]
pub struct UiContext {
    interactive: bool,
    auto_yes: bool,
}

impl UiContext {
    /// Detect from the attached terminal and CI environment
    pub fn detect() -> Self {
        let tty = std::io::stdout().is_terminal() && std::io::stdin().is_terminal();
        let ci = CI_VARS.iter().any(|var| std::env::var_os(var).is_some());
        Self {
            interactive: tty && !ci,
            auto_yes: false,
        }
    }

    /// Plain output, prompts answered with their defaults
    pub fn non_interactive() -> Self {
        Self {
            interactive: false,
            auto_yes: false,
        }
    }

    /// Answer every confirmation with yes
    pub fn with_auto_yes(mut self, yes: bool) -> Self {
        self.auto_yes = yes;
        self
    }

    /// Whether prompts can be shown
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Whether confirmations are pre-approved
    pub fn auto_yes(&self) -> bool {
        self.auto_yes
    }

    /// Whether to draw progress bars and cliclack frames
    pub fn use_fancy_output(&self) -> bool {
        self.interactive
    }
}
