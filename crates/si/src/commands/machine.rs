//! `si sun machine`: registry, ACL and remote jobs

use crate::output;
use clap::Subcommand;
use colored::Colorize;
use si_config::Settings;
use si_sun::machine::{DEFAULT_JOB_TIMEOUT_SECS, resolve_machine_id, resolve_operator_id};
use si_sun::{
    DispatchRequest, Dispatcher, JobFilter, JobRunner, JobStatus, MachineJob, MachineRecord,
    RegisterRequest, ServeOptions, SunClient, SunError, split_csv,
};
use std::time::Duration;

#[derive(Subcommand, Debug, Clone)]
pub enum MachineCommands {
    /// Register this (or --machine) machine, or update its capabilities
    Register {
        #[arg(long, default_value = "")]
        machine: String,
        #[arg(long, default_value = "")]
        operator: String,
        #[arg(long, default_value = "")]
        display_name: String,
        /// Extra operators allowed to control the machine (comma-separated, repeatable)
        #[arg(long = "allow")]
        allow: Vec<String>,
        /// May dispatch jobs to other machines
        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        can_control_others: Option<bool>,
        /// Accepts jobs from allowed operators
        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        can_be_controlled: Option<bool>,
    },
    /// One machine record
    Status {
        #[arg(long, default_value = "")]
        machine: String,
    },
    /// Registered machines
    List {
        #[arg(long, default_value_t = 200)]
        limit: usize,
    },
    /// Grant an operator control of a machine (owner only)
    Allow {
        #[arg(long, default_value = "")]
        machine: String,
        /// Operator to grant
        #[arg(long)]
        grant: String,
        /// Acting operator
        #[arg(long, default_value = "")]
        operator: String,
    },
    /// Revoke an operator (owner only)
    Deny {
        #[arg(long, default_value = "")]
        machine: String,
        /// Operator to revoke
        #[arg(long)]
        revoke: String,
        #[arg(long, default_value = "")]
        operator: String,
    },
    /// Queue an si command on another machine
    #[command(alias = "exec")]
    Run {
        /// Target machine
        #[arg(long)]
        machine: String,
        /// Dispatching machine (default: this one)
        #[arg(long, default_value = "")]
        source_machine: String,
        #[arg(long, default_value = "")]
        operator: String,
        #[arg(long, default_value_t = DEFAULT_JOB_TIMEOUT_SECS)]
        timeout_seconds: u64,
        /// Block until the job finishes
        #[arg(long)]
        wait: bool,
        #[arg(long, default_value_t = 2)]
        poll_seconds: u64,
        /// si arguments to run, after `--`
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Jobs, oldest first
    Jobs {
        #[arg(long, default_value = "")]
        machine: String,
        #[arg(long, default_value = "")]
        requested_by: String,
        /// queued, running, succeeded, failed or denied
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },
    /// Claim and run jobs queued for this machine
    Serve {
        #[arg(long, default_value = "")]
        machine: String,
        /// Stop after one poll
        #[arg(long)]
        once: bool,
        /// Stop after this many jobs (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        max_jobs: usize,
        #[arg(long, default_value_t = 5)]
        poll_seconds: u64,
    },
}

fn print_machine(record: &MachineRecord, as_json: bool) -> anyhow::Result<()> {
    if as_json {
        return output::print_json(record);
    }
    output::print_fields(&[
        ("machine_id", record.machine_id.clone()),
        ("display_name", record.display_name.clone()),
        ("owner", record.owner_operator.clone()),
        ("can_control_others", record.capabilities.can_control_others.to_string()),
        ("can_be_controlled", record.capabilities.can_be_controlled.to_string()),
        ("allowed_operators", record.acl.allowed_operators.join(",")),
        ("last_seen_at", record.heartbeat.last_seen_at.clone()),
    ]);
    Ok(())
}

fn print_job(job: &MachineJob, as_json: bool) -> anyhow::Result<()> {
    if as_json {
        return output::print_json(job);
    }
    let status = match job.status {
        JobStatus::Succeeded => job.status.as_str().green(),
        JobStatus::Failed | JobStatus::Denied => job.status.as_str().red(),
        _ => job.status.as_str().yellow(),
    };
    output::print_fields(&[
        ("job_id", job.job_id.clone()),
        ("machine", job.machine_id.clone()),
        ("requested_by", job.requested_by.clone()),
        ("command", job.command.join(" ")),
        ("status", status.to_string()),
        ("exit_code", job.exit_code.to_string()),
    ]);
    if !job.error.is_empty() {
        println!("{} {}", "error:".red(), job.error);
    }
    if !job.stdout.is_empty() {
        println!("{}\n{}", "--- stdout".dimmed(), job.stdout.trim_end());
    }
    if !job.stderr.is_empty() {
        println!("{}\n{}", "--- stderr".dimmed(), job.stderr.trim_end());
    }
    Ok(())
}

pub async fn handle(command: &MachineCommands, settings: &Settings, as_json: bool) -> anyhow::Result<()> {
    let client = SunClient::from_settings(settings)?;
    let dispatcher = Dispatcher::new(&client);

    match command {
        MachineCommands::Register {
            machine,
            operator,
            display_name,
            allow,
            can_control_others,
            can_be_controlled,
        } => {
            let machine_id = resolve_machine_id(settings, machine);
            let req = RegisterRequest {
                operator_id: resolve_operator_id(settings, operator, &machine_id),
                machine_id,
                display_name: display_name.clone(),
                allow_operators: allow.iter().flat_map(|raw| split_csv(raw)).collect(),
                can_control_others: *can_control_others,
                can_be_controlled: *can_be_controlled,
            };
            let (record, revision) = dispatcher.register(&req).await?;
            if !as_json {
                output::success(format!("registered {} (revision {})", record.machine_id, revision));
            }
            print_machine(&record, as_json)
        }
        MachineCommands::Status { machine } => {
            let record = dispatcher.status(&resolve_machine_id(settings, machine)).await?;
            print_machine(&record, as_json)
        }
        MachineCommands::List { limit } => {
            let rows = dispatcher.list(*limit).await?;
            if as_json {
                return output::print_json(&rows);
            }
            if rows.is_empty() {
                println!("No machines registered");
                return Ok(());
            }
            println!(
                "{}",
                format!(
                    "{:<24} {:<28} {:<8} {:<8} {}",
                    "MACHINE", "OWNER", "CONTROL", "REMOTE", "LAST SEEN"
                )
                .bold()
            );
            for record in &rows {
                println!(
                    "{:<24} {:<28} {:<8} {:<8} {}",
                    record.machine_id,
                    record.owner_operator,
                    record.capabilities.can_control_others,
                    record.capabilities.can_be_controlled,
                    record.heartbeat.last_seen_at
                );
            }
            Ok(())
        }
        MachineCommands::Allow {
            machine,
            grant,
            operator,
        } => {
            let machine_id = resolve_machine_id(settings, machine);
            let caller = resolve_operator_id(settings, operator, &machine_id);
            let (record, _) = dispatcher.allow(&machine_id, grant, &caller).await?;
            if !as_json {
                output::success(format!("granted {} on {}", grant, record.machine_id));
            }
            print_machine(&record, as_json)
        }
        MachineCommands::Deny {
            machine,
            revoke,
            operator,
        } => {
            let machine_id = resolve_machine_id(settings, machine);
            let caller = resolve_operator_id(settings, operator, &machine_id);
            let (record, _) = dispatcher.deny(&machine_id, revoke, &caller).await?;
            if !as_json {
                output::success(format!("revoked {} on {}", revoke, record.machine_id));
            }
            print_machine(&record, as_json)
        }
        MachineCommands::Run {
            machine,
            source_machine,
            operator,
            timeout_seconds,
            wait,
            poll_seconds,
            command,
        } => {
            let source = resolve_machine_id(settings, source_machine);
            let req = DispatchRequest {
                target_machine: machine.clone(),
                operator_id: resolve_operator_id(settings, operator, &source),
                source_machine: source,
                command: command.clone(),
                timeout_seconds: *timeout_seconds,
            };
            let (name, job) = dispatcher.dispatch(&req).await?;
            if !wait {
                if !as_json {
                    output::success(format!("queued {} on {}", job.job_id, job.machine_id));
                }
                return print_job(&job, as_json);
            }
            // the target only notices the job on its next poll
            let slack = (*poll_seconds).max(5) * 2;
            let deadline = Duration::from_secs(job.timeout_seconds + slack);
            let finished = dispatcher
                .wait(&name, Duration::from_secs(*poll_seconds), deadline)
                .await?;
            print_job(&finished, as_json)?;
            match finished.failure() {
                Some(failure) => Err(SunError::Job(failure).into()),
                None => Ok(()),
            }
        }
        MachineCommands::Jobs {
            machine,
            requested_by,
            status,
            limit,
        } => {
            let status = match status.as_deref() {
                Some(raw) => Some(
                    JobStatus::parse(raw)
                        .ok_or_else(|| anyhow::anyhow!("unknown job status {raw:?}"))?,
                ),
                None => None,
            };
            let filter = JobFilter {
                machine_id: machine.clone(),
                requested_by: requested_by.clone(),
                status,
                limit: *limit,
            };
            let jobs = dispatcher.jobs(&filter).await?;
            if as_json {
                return output::print_json(&jobs);
            }
            if jobs.is_empty() {
                println!("No jobs");
                return Ok(());
            }
            println!(
                "{}",
                format!(
                    "{:<30} {:<20} {:<10} {:>4} {}",
                    "JOB", "MACHINE", "STATUS", "EXIT", "COMMAND"
                )
                .bold()
            );
            for job in &jobs {
                println!(
                    "{:<30} {:<20} {:<10} {:>4} {}",
                    job.job_id,
                    job.machine_id,
                    job.status.as_str(),
                    job.exit_code,
                    job.command.join(" ")
                );
            }
            Ok(())
        }
        MachineCommands::Serve {
            machine,
            once,
            max_jobs,
            poll_seconds,
        } => {
            let opts = ServeOptions {
                machine_id: resolve_machine_id(settings, machine),
                poll_interval: Duration::from_secs(*poll_seconds),
                once: *once,
                max_jobs: *max_jobs,
            };
            let runner = JobRunner::current()?;
            if !as_json {
                eprintln!("{} serving jobs for {}", "→".cyan(), opts.machine_id.bold());
            }
            let shutdown = async {
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            };
            let summary = dispatcher.serve(&opts, &runner, shutdown).await?;
            if as_json {
                output::print_json(&summary)
            } else {
                output::success(format!(
                    "{}: processed {} job(s)",
                    summary.machine_id, summary.processed
                ));
                Ok(())
            }
        }
    }
}
