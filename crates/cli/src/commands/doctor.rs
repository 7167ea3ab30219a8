use parley_agent::llm::build_model_client;
use parley_core::config::{AppConfig, LlmProvider, LoadOptions};
use serde::Serialize;

use crate::commands::{escape_json, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult::raw(exit_code, output);
    }

    CommandResult::raw(exit_code, render_human(&report))
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_model_client(&config));
            checks.push(check_provider_readiness(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(skipped("model_client"));
            checks.push(skipped("provider_readiness"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn skipped(name: &'static str) -> DoctorCheck {
    DoctorCheck {
        name,
        status: CheckStatus::Skipped,
        details: "skipped because configuration did not load".to_string(),
    }
}

fn check_model_client(config: &AppConfig) -> DoctorCheck {
    match build_model_client(&config.llm, &config.mock) {
        Ok(client) => DoctorCheck {
            name: "model_client",
            status: CheckStatus::Pass,
            details: format!("`{}` client constructed", client.name()),
        },
        Err(error) => {
            DoctorCheck { name: "model_client", status: CheckStatus::Fail, details: error.to_string() }
        }
    }
}

fn check_provider_readiness(config: &AppConfig) -> DoctorCheck {
    let details = match config.llm.provider {
        LlmProvider::Mock => {
            format!("mock provider streams canned replies every {}ms", config.mock.delay_ms)
        }
        LlmProvider::OpenAi | LlmProvider::Ollama => {
            let endpoint = config.llm.effective_base_url().unwrap_or_else(|| "<unset>".into());
            format!(
                "{} provider targets `{endpoint}` with model `{}`",
                config.llm.provider.as_str(),
                config.llm.model
            )
        }
    };

    DoctorCheck { name: "provider_readiness", status: CheckStatus::Pass, details }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{render_human, CheckStatus, DoctorCheck, DoctorReport};

    #[test]
    fn human_rendering_marks_each_check() {
        let report = DoctorReport {
            overall_status: CheckStatus::Fail,
            summary: "doctor: one or more readiness checks failed".to_string(),
            checks: vec![
                DoctorCheck {
                    name: "config_validation",
                    status: CheckStatus::Fail,
                    details: "bad port".to_string(),
                },
                DoctorCheck {
                    name: "model_client",
                    status: CheckStatus::Skipped,
                    details: "skipped".to_string(),
                },
            ],
        };

        let rendered = render_human(&report);
        assert!(rendered.starts_with("doctor: one or more readiness checks failed"));
        assert!(rendered.contains("- [fail] config_validation: bad port"));
        assert!(rendered.contains("- [skip] model_client: skipped"));
    }
}
