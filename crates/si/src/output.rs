//! Printers shared by every command

use colored::Colorize;
use serde::Serialize;
use serde_json::{Value, json};
use si_runtime::{Response, RuntimeError, redact};
use si_sun::SunError;

/// Output already went to the terminal; exit 1 without printing the error
/// again.
#[derive(Debug)]
pub struct AlreadyReported;

impl std::fmt::Display for AlreadyReported {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("command reported failure")
    }
}

impl std::error::Error for AlreadyReported {}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Provider response: the normalized JSON with `--json`, otherwise a status
/// line followed by the payload.
pub fn print_response(response: &Response, as_json: bool) -> anyhow::Result<()> {
    if as_json {
        return print_json(response);
    }
    let status = format!("{} {}", response.status_code, response.status);
    if response.is_success() {
        println!("{}", status.green().bold());
    } else {
        println!("{}", status.yellow().bold());
    }
    if !response.request_id.is_empty() {
        println!("{}", format!("request id: {}", response.request_id).dimmed());
    }
    if let Some(data) = &response.data {
        println!("{}", serde_json::to_string_pretty(data)?);
    } else if !response.list.is_empty() {
        println!("{}", serde_json::to_string_pretty(&response.list)?);
    } else if !response.body.trim().is_empty() {
        println!("{}", redact(response.body.trim()));
    }
    Ok(())
}

/// `(label, value)` lines with aligned labels.
pub fn print_fields(fields: &[(&str, String)]) {
    let width = fields.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    for (label, value) in fields {
        let value = if value.is_empty() { "-" } else { value.as_str() };
        println!("{}  {}", format!("{label:<width$}").bold(), value);
    }
}

pub fn success(message: impl AsRef<str>) {
    println!("{} {}", "✓".green(), message.as_ref());
}

/// JSON payload for a failed command.
pub fn error_json(err: &anyhow::Error) -> Value {
    if let Some(runtime) = err.downcast_ref::<RuntimeError>() {
        return runtime.to_json();
    }
    if let Some(SunError::Job(job)) = err.downcast_ref::<SunError>() {
        return json!({
            "error": {
                "kind": "job",
                "message": job.to_string(),
                "job_id": job.job_id,
                "status": job.status,
                "exit_code": job.exit_code,
            }
        });
    }
    if let Some(sun) = err.downcast_ref::<SunError>()
        && let Some(status) = sun.status_code()
    {
        return json!({
            "error": {
                "kind": "sun",
                "status_code": status,
                "message": redact(&format!("{err:#}")),
            }
        });
    }
    json!({ "error": { "message": redact(&format!("{err:#}")) } })
}

pub fn report_error(err: &anyhow::Error, as_json: bool) {
    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&error_json(err)).unwrap_or_default()
        );
    } else {
        eprintln!("{} {}", "error:".red().bold(), redact(&format!("{err:#}")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_json_for_missing_credential() {
        let err = anyhow::Error::new(RuntimeError::MissingCredential {
            what: "cloudflare api token".to_string(),
            tried: vec!["--api-token".to_string(), "env:CLOUDFLARE_API_TOKEN".to_string()],
        });
        let payload = error_json(&err);
        assert_eq!(payload["error"]["kind"], "missing_credential");
        assert_eq!(payload["error"]["tried"][0], "--api-token");
    }

    #[test]
    fn test_error_json_for_denied_job() {
        let err = anyhow::Error::new(SunError::Job(si_sun::JobError {
            job_id: "job-1".to_string(),
            status: "denied".to_string(),
            exit_code: 1,
            error: "operator not allowed".to_string(),
        }));
        let payload = error_json(&err);
        assert_eq!(payload["error"]["status"], "denied");
        assert_eq!(payload["error"]["job_id"], "job-1");
    }

    #[test]
    fn test_error_json_redacts_plain_errors() {
        let err = anyhow::anyhow!("upstream said Authorization: Bearer abc.def-123");
        let message = error_json(&err)["error"]["message"].as_str().unwrap().to_string();
        assert!(!message.contains("abc.def-123"));
    }
}
