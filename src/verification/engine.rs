//! Checklist runner

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::core::CommandExecutor;
use crate::infra::InfraOutputs;
use crate::templates::{FileTree, InstantiationRequest, Template, unresolved_placeholders};
use crate::verification::{
    CheckResult, HealthProbe, ProbeResponse, TargetKind, VerificationConfig, VerificationReport,
};

/// Optional parts of the template checklist
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateChecks {
    pub skip_build: bool,
    pub skip_container: bool,
}

pub struct VerificationEngine {
    executor: Arc<dyn CommandExecutor>,
    probe: Arc<dyn HealthProbe>,
    config: VerificationConfig,
}

async fn timed<F>(name: &str, timeout: Duration, check: F) -> CheckResult
where
    F: Future<Output = Result<String, String>>,
{
    let started = Instant::now();
    let result = match tokio::time::timeout(timeout, check).await {
        Ok(Ok(detail)) => CheckResult::passed(name, started.elapsed(), detail),
        Ok(Err(detail)) => CheckResult::failed(name, started.elapsed(), detail),
        Err(_) => CheckResult::failed(name, started.elapsed(), "timeout"),
    };
    debug!(check = %name, outcome = ?result.outcome, detail = %result.detail, "Check finished");
    result
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

impl VerificationEngine {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        probe: Arc<dyn HealthProbe>,
        config: VerificationConfig,
    ) -> Self {
        Self {
            executor,
            probe,
            config,
        }
    }

    /// Structural, build and container checks for a materialized template
    ///
    /// `tree` is written to `work_dir` before the build runs.
    pub async fn verify_template(
        &self,
        template: &Template,
        request: &InstantiationRequest,
        tree: &FileTree,
        work_dir: &Path,
        options: TemplateChecks,
    ) -> VerificationReport {
        let muppet = &request.muppet_name;
        info!(template = %template.name, muppet = %muppet, "Verifying template");
        let mut checks = vec![
            timed("structural", self.config.check_timeout(), async {
                self.structural(template, tree)
            })
            .await,
        ];

        let written = tree
            .write_to(work_dir)
            .await
            .map_err(|e| format!("failed to write project to {}: {e}", work_dir.display()));

        if options.skip_build {
            checks.push(CheckResult::skipped("build"));
        } else {
            let command = template.kind.build_command();
            checks.push(
                timed("build", self.config.build_timeout(), async {
                    written.clone()?;
                    self.run_command(command, work_dir).await
                })
                .await,
            );
        }

        if options.skip_container {
            checks.push(CheckResult::skipped("container"));
        } else {
            let container = format!("muppet-verify-{muppet}");
            let limit = self.config.build_timeout() + self.config.startup_grace();
            let result = timed("container", limit, async {
                written.clone()?;
                let port = template.container_port(&request.params);
                self.container(template, port, &container, work_dir).await
            })
            .await;
            self.remove_container(&container, work_dir).await;
            checks.push(result);
        }

        let report = VerificationReport::new(&template.name, TargetKind::Template, checks);
        info!(template = %template.name, passed = report.passed, "Template verification finished");
        report
    }

    /// Reachability and health checks against a deployed muppet
    pub async fn verify_deployment(
        &self,
        muppet: &str,
        outputs: &InfraOutputs,
        health_path: &str,
    ) -> VerificationReport {
        info!(muppet = %muppet, "Verifying deployment");
        let timeout = self.config.check_timeout();

        let reachability = timed("reachability", timeout, async {
            if outputs.partial {
                return Err("infrastructure outputs are partial".to_string());
            }
            let url = outputs
                .service_url
                .as_deref()
                .ok_or_else(|| "no service_url output".to_string())?;
            let response = self.probe.get(url).await.map_err(|e| e.to_string())?;
            Ok(format!("{url} answered HTTP {}", response.status))
        })
        .await;

        let health = timed("health", timeout, async {
            let url = outputs
                .service_url
                .as_deref()
                .ok_or_else(|| "no service endpoint".to_string())?;
            let url = join_url(url, health_path);
            let response = self.wait_healthy(&url, self.config.startup_grace()).await?;
            Ok(format!(
                "{url} answered HTTP 200 in {}ms",
                response.elapsed.as_millis()
            ))
        })
        .await;

        let report = VerificationReport::new(muppet, TargetKind::Deployment, vec![reachability, health]);
        if report.passed {
            info!(muppet = %muppet, "Deployment verified");
        } else {
            warn!(muppet = %muppet, failures = report.failures().count(), "Deployment verification failed");
        }
        report
    }

    fn structural(&self, template: &Template, tree: &FileTree) -> Result<String, String> {
        let mut problems = Vec::new();

        let missing: Vec<&str> = template
            .required_files
            .iter()
            .map(String::as_str)
            .filter(|path| !tree.contains(path))
            .collect();
        if !missing.is_empty() {
            problems.push(format!("missing files: {}", missing.join(", ")));
        }

        let unresolved = unresolved_placeholders(tree);
        if !unresolved.is_empty() {
            problems.push(format!("unresolved placeholders: {}", unresolved.join("; ")));
        }

        if tree.subtree(&template.pipeline_dir).is_empty() {
            problems.push(format!("no pipeline files under {}", template.pipeline_dir));
        }

        if problems.is_empty() {
            Ok(format!("{} files, all required files present", tree.len()))
        } else {
            Err(problems.join("; "))
        }
    }

    async fn run_command(&self, command: &str, dir: &Path) -> Result<String, String> {
        let result = self
            .executor
            .execute(command, dir)
            .await
            .map_err(|e| format!("'{command}' could not start: {e}"))?;
        if result.is_success() {
            Ok(format!("'{command}' succeeded"))
        } else {
            Err(format!(
                "'{command}' exited with {}: {}",
                result.exit_code,
                result.summary()
            ))
        }
    }

    async fn container(
        &self,
        template: &Template,
        port: u16,
        container: &str,
        work_dir: &Path,
    ) -> Result<String, String> {
        let runtime = &self.config.container_runtime;
        let image = format!("{container}:verify");
        let host_port = self.config.container_host_port;

        self.run_command(&format!("{runtime} build -t {image} ."), work_dir)
            .await?;
        self.run_command(
            &format!(
                "{runtime} run -d --rm --name {container} -p {host_port}:{port} {image}"
            ),
            work_dir,
        )
        .await?;

        let url = join_url(
            &format!("http://127.0.0.1:{host_port}"),
            template.kind.health_check_path(),
        );
        let response = self.wait_healthy(&url, self.config.startup_grace()).await?;
        Ok(format!(
            "container healthy at {url} ({}ms)",
            response.elapsed.as_millis()
        ))
    }

    async fn remove_container(&self, container: &str, work_dir: &Path) {
        let command = format!("{} rm -f {container}", self.config.container_runtime);
        if let Err(e) = self.executor.execute(&command, work_dir).await {
            warn!(container = %container, error = %e, "Failed to remove verification container");
        }
    }

    /// Poll `url` until it answers 200 fast enough or `grace` runs out
    async fn wait_healthy(&self, url: &str, grace: Duration) -> Result<ProbeResponse, String> {
        let started = Instant::now();
        let max_response = self.config.max_response();

        loop {
            let last = match self.probe.get(url).await {
                Ok(response) if response.is_ok() && response.elapsed <= max_response => {
                    return Ok(response);
                }
                Ok(response) if response.is_ok() => format!(
                    "responded in {}ms, limit is {}ms",
                    response.elapsed.as_millis(),
                    max_response.as_millis()
                ),
                Ok(response) => format!("HTTP {}", response.status),
                Err(e) => e.to_string(),
            };

            if started.elapsed() >= grace {
                return Err(format!("{url} not healthy: {last}"));
            }
            debug!(url = %url, last = %last, "Waiting for health endpoint");
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }
}
