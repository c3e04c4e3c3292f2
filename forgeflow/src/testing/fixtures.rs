//! Target and engine fixtures.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::core::{ArtifactSpec, StepKind, StepTemplate, Target};
use crate::engine::Engine;
use crate::errors::Result;
use crate::pipeline::CommandExecutor;

/// A three-step web build: install, test (one retry), bundle.
#[must_use]
pub fn web_prod_target() -> Target {
    Target::build("web_prod")
        .with_name("Web (production)")
        .with_output_dir("dist")
        .with_output(ArtifactSpec::new("bundle", "bundle", "bundle.js"))
        .with_step(StepTemplate::new("install", StepKind::Install, "npm ci").with_timeout_ms(60_000))
        .with_step(
            StepTemplate::new("test", StepKind::Test, "npm test")
                .with_timeout_ms(60_000)
                .with_max_retries(1),
        )
        .with_step(
            StepTemplate::new("bundle", StepKind::Bundle, "npm run build").with_timeout_ms(60_000),
        )
}

/// A build target with one required step per id.
#[must_use]
pub fn build_target(id: &str, steps: &[&str]) -> Target {
    steps.iter().fold(Target::build(id), |target, step| {
        target.with_step(StepTemplate::new(*step, StepKind::Compile, format!("run {step}")))
    })
}

/// A deploy target with deploy and health-check steps.
#[must_use]
pub fn deploy_target(id: &str, baseline_version: Option<&str>) -> Target {
    let target = Target::deploy(id)
        .with_step(StepTemplate::new("deploy", StepKind::Deploy, "kubectl apply -f release.yaml"))
        .with_step(StepTemplate::new("health", StepKind::HealthCheck, "curl -fsS /healthz"));
    match baseline_version {
        Some(version) => target.with_baseline_version(version),
        None => target,
    }
}

/// Builds an engine over the given executor and targets.
pub fn engine_with(
    commands: Arc<dyn CommandExecutor>,
    config: EngineConfig,
    targets: impl IntoIterator<Item = Target>,
) -> Result<Engine> {
    Engine::builder()
        .with_config(config)
        .with_targets(targets)
        .with_command_executor(commands)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_validate() {
        web_prod_target().validate().unwrap();
        build_target("api", &["a", "b"]).validate().unwrap();
        deploy_target("prod", Some("1.0.0")).validate().unwrap();
        assert_eq!(deploy_target("prod", None).baseline_version, None);
    }
}
