use anyhow::Result;

use guardlight_core::models::Job;

use crate::config::Config;
use crate::engine::Engine;

pub async fn list_jobs(config: &Config) -> Result<()> {
    let engine = Engine::open(config).await?;
    let jobs = engine.ledger.get_all_non_finished_jobs().await;
    engine.close().await;
    print_jobs(&jobs?);
    Ok(())
}

fn print_jobs(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("No pending jobs.");
        return;
    }
    println!(
        "{:<36}  {:<8} {:<11} {:<24} {:<7} DESCRIPTION",
        "JOB", "TYPE", "STATUS", "GROUP", "RETRIES"
    );
    for job in jobs {
        println!(
            "{:<36}  {:<8} {:<11} {:<24} {:<7} {}",
            job.id,
            job.job_type,
            job.status,
            job.group_key,
            job.retry_count,
            job.status_description
        );
    }
}
