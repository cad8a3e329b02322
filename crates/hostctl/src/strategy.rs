//! Strategy and recipe definitions
//!
//! A [`Strategy`] is one concrete way of realizing a capability: a tool, an
//! invocation recipe built from argument templates, and a timeout. Templates
//! are bound per invocation by the executor.

use std::time::Duration;

use crate::{HostError, Result};

/// Quick interactive tools (lockers, power control)
pub const QUICK_TIMEOUT: Duration = Duration::from_secs(5);
/// Capture and speech tools
pub const CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a resident tool must survive to count as started
pub const RESIDENT_SETTLE: Duration = Duration::from_secs(2);

/// One argument or environment value template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Literal text
    Lit(String),
    /// Invocation payload (speech text)
    Payload,
    /// Full path of the artifact the strategy must write
    Artifact,
    /// Directory of the artifact
    ArtifactDir,
    /// File name of the artifact
    ArtifactName,
    /// Path of the intermediate file shared by pipeline stages
    Intermediate,
    /// Capture device path
    Device,
    /// Capture device with a literal prefix, as one argument (`video=<device>`)
    PrefixedDevice(String),
    /// Delay in seconds
    Delay,
}

impl Arg {
    /// Placeholder name used in diagnostics
    pub fn placeholder_name(&self) -> Option<&'static str> {
        match self {
            Self::Lit(_) => None,
            Self::Payload => Some("payload"),
            Self::Artifact => Some("artifact"),
            Self::ArtifactDir => Some("artifact_dir"),
            Self::ArtifactName => Some("artifact_name"),
            Self::Intermediate => Some("intermediate"),
            Self::Device | Self::PrefixedDevice(_) => Some("device"),
            Self::Delay => Some("delay"),
        }
    }

    /// Whether the template needs the invocation scratch directory
    pub fn needs_scratch(&self) -> bool {
        matches!(
            self,
            Self::Artifact | Self::ArtifactDir | Self::ArtifactName | Self::Intermediate
        )
    }

    /// Substitute bound values
    pub fn bind(&self, bindings: &Bindings) -> Result<String> {
        let value = match self {
            Self::Lit(text) => return Ok(text.clone()),
            Self::Payload => bindings.payload.clone(),
            Self::Artifact => bindings.artifact.clone(),
            Self::ArtifactDir => bindings.artifact_dir.clone(),
            Self::ArtifactName => bindings.artifact_name.clone(),
            Self::Intermediate => bindings.intermediate.clone(),
            Self::Device => bindings.device.clone(),
            Self::PrefixedDevice(prefix) => bindings.device.as_ref().map(|d| format!("{}{}", prefix, d)),
            Self::Delay => bindings.delay.map(|d| d.to_string()),
        };
        value.ok_or(HostError::Unbound(self.placeholder_name().unwrap_or("literal")))
    }
}

impl From<&str> for Arg {
    fn from(text: &str) -> Self {
        Self::Lit(text.to_string())
    }
}

impl From<String> for Arg {
    fn from(text: String) -> Self {
        Self::Lit(text)
    }
}

/// Values substituted into templates for one attempt
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    /// Speech text
    pub payload: Option<String>,
    /// Artifact path
    pub artifact: Option<String>,
    /// Artifact directory
    pub artifact_dir: Option<String>,
    /// Artifact file name
    pub artifact_name: Option<String>,
    /// Intermediate file path
    pub intermediate: Option<String>,
    /// Capture device
    pub device: Option<String>,
    /// Delay in seconds
    pub delay: Option<u64>,
}

/// A single program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Tool name, resolved through the probe
    program: String,
    /// Argument templates
    args: Vec<Arg>,
    /// Extra environment templates
    env: Vec<(String, Arg)>,
}

impl Step {
    /// Invoke `program` with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append one argument template
    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append literal arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|a| Arg::Lit(a.into())));
        self
    }

    /// Set an environment variable from a template
    pub fn env(mut self, key: impl Into<String>, value: impl Into<Arg>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Tool name
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Argument templates
    pub fn arg_templates(&self) -> &[Arg] {
        &self.args
    }

    /// Bind argument templates
    pub fn bind_args(&self, bindings: &Bindings) -> Result<Vec<String>> {
        self.args.iter().map(|a| a.bind(bindings)).collect()
    }

    /// Bind environment templates
    pub fn bind_env(&self, bindings: &Bindings) -> Result<Vec<(String, String)>> {
        self.env
            .iter()
            .map(|(k, v)| Ok((k.clone(), v.bind(bindings)?)))
            .collect()
    }

    /// Command line with placeholders shown as `{name}`, for logs
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        for arg in &self.args {
            match arg {
                Arg::Lit(text) => parts.push(text.clone()),
                other => parts.push(format!("{{{}}}", other.placeholder_name().unwrap_or("?"))),
            }
        }
        parts.join(" ")
    }

    fn needs_scratch(&self) -> bool {
        self.args.iter().chain(self.env.iter().map(|(_, v)| v)).any(Arg::needs_scratch)
    }

    fn with_device(&self, device: &str) -> Self {
        let swap = |arg: &Arg| match arg {
            Arg::Device => Arg::Lit(device.to_string()),
            Arg::PrefixedDevice(prefix) => Arg::Lit(format!("{}{}", prefix, device)),
            other => other.clone(),
        };
        Self {
            program: self.program.clone(),
            args: self.args.iter().map(swap).collect(),
            env: self.env.iter().map(|(k, v)| (k.clone(), swap(v))).collect(),
        }
    }
}

/// How a strategy's tools are run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipe {
    /// Run once and wait for exit
    Exec(Step),
    /// Run once with the payload written to stdin
    Stdin(Step),
    /// Producer writes the intermediate file, consumer reads it
    Pipeline {
        /// First stage
        producer: Step,
        /// Second stage
        consumer: Step,
        /// File name of the intermediate inside the scratch directory
        intermediate: String,
    },
    /// Long-running tool judged after a settle window and never killed
    Resident {
        /// The tool
        step: Step,
        /// How long it must stay up (or exit 0) to succeed
        settle: Duration,
    },
}

impl Recipe {
    /// Steps in execution order
    pub fn steps(&self) -> Vec<&Step> {
        match self {
            Self::Exec(step) | Self::Stdin(step) | Self::Resident { step, .. } => vec![step],
            Self::Pipeline { producer, consumer, .. } => vec![producer, consumer],
        }
    }

    fn map_steps(&self, f: impl Fn(&Step) -> Step) -> Self {
        match self {
            Self::Exec(step) => Self::Exec(f(step)),
            Self::Stdin(step) => Self::Stdin(f(step)),
            Self::Pipeline { producer, consumer, intermediate } => Self::Pipeline {
                producer: f(producer),
                consumer: f(consumer),
                intermediate: intermediate.clone(),
            },
            Self::Resident { step, settle } => Self::Resident {
                step: f(step),
                settle: *settle,
            },
        }
    }
}

/// One concrete way of realizing a capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategy {
    /// Name shown in replies and diagnostics
    name: String,
    /// Invocation recipe
    recipe: Recipe,
    /// Budget for the whole recipe
    timeout: Duration,
    /// Success additionally requires a non-empty artifact
    produces_artifact: bool,
}

impl Strategy {
    fn from_recipe(recipe: Recipe, timeout: Duration) -> Self {
        let name = recipe
            .steps()
            .first()
            .map(|s| s.program().to_string())
            .unwrap_or_default();
        Self {
            name,
            recipe,
            timeout,
            produces_artifact: false,
        }
    }

    /// One-shot strategy
    pub fn exec(step: Step, timeout: Duration) -> Self {
        Self::from_recipe(Recipe::Exec(step), timeout)
    }

    /// Stdin-fed strategy
    pub fn stdin(step: Step, timeout: Duration) -> Self {
        Self::from_recipe(Recipe::Stdin(step), timeout)
    }

    /// Two-stage strategy sharing one timeout
    pub fn pipeline(producer: Step, consumer: Step, intermediate: impl Into<String>, timeout: Duration) -> Self {
        let mut strategy = Self::from_recipe(
            Recipe::Pipeline {
                producer,
                consumer,
                intermediate: intermediate.into(),
            },
            timeout,
        );
        if let Recipe::Pipeline { producer, consumer, .. } = &strategy.recipe {
            strategy.name = format!("{}+{}", producer.program(), consumer.program());
        }
        strategy
    }

    /// Resident strategy with the default settle window
    pub fn resident(step: Step, timeout: Duration) -> Self {
        Self::from_recipe(
            Recipe::Resident {
                step,
                settle: RESIDENT_SETTLE.min(timeout),
            },
            timeout,
        )
    }

    /// Override the display name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Require a non-empty artifact for success
    pub fn producing_artifact(mut self) -> Self {
        self.produces_artifact = true;
        self
    }

    /// Copy with `{device}` replaced by `device`, named `<name> (<device>)`
    pub fn bind_device(&self, device: &str) -> Self {
        Self {
            name: format!("{} ({})", self.name, device),
            recipe: self.recipe.map_steps(|s| s.with_device(device)),
            timeout: self.timeout,
            produces_artifact: self.produces_artifact,
        }
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Recipe
    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    /// Timeout budget
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether success requires an artifact
    pub fn produces_artifact(&self) -> bool {
        self.produces_artifact
    }

    /// Every tool the recipe needs
    pub fn tools(&self) -> Vec<&str> {
        let mut tools: Vec<&str> = self.recipe.steps().iter().map(|s| s.program()).collect();
        tools.dedup();
        tools
    }

    /// Whether an invocation scratch directory is required
    pub fn needs_scratch(&self) -> bool {
        self.produces_artifact
            || matches!(self.recipe, Recipe::Pipeline { .. })
            || self.recipe.steps().iter().any(|s| s.needs_scratch())
    }
}
