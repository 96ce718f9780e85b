//! CLI command implementations over the HTTP API.

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};

async fn check(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .unwrap_or_else(|_| json!({"error": "empty response"}));
    if !status.is_success() {
        let message = body["error"].as_str().unwrap_or("unknown error");
        bail!("{status}: {message}");
    }
    Ok(body)
}

fn print_pretty(value: &Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

#[allow(clippy::too_many_arguments)]
pub async fn submit(
    api_url: &str,
    queue: &str,
    payload: &str,
    id: Option<String>,
    priority: Option<i32>,
    delay_ms: Option<u64>,
    max_attempts: Option<u32>,
) -> Result<()> {
    let payload: Value = serde_json::from_str(payload).context("payload is not valid JSON")?;
    let mut body = json!({ "payload": payload });
    if let Some(id) = id {
        body["jobId"] = json!(id);
    }
    if let Some(priority) = priority {
        body["priority"] = json!(priority);
    }
    if let Some(delay_ms) = delay_ms {
        body["delayMs"] = json!(delay_ms);
    }
    if let Some(max_attempts) = max_attempts {
        body["maxAttempts"] = json!(max_attempts);
    }

    let response = reqwest::Client::new()
        .post(format!("{api_url}/api/queues/{queue}/jobs"))
        .json(&body)
        .send()
        .await?;
    let job = check(response).await?;
    println!(
        "submitted {} to {} ({})",
        job["id"].as_str().unwrap_or("?"),
        queue,
        job["status"].as_str().unwrap_or("?")
    );
    Ok(())
}

pub async fn status(api_url: &str, queue: &str, id: &str) -> Result<()> {
    let response = reqwest::get(format!("{api_url}/api/queues/{queue}/jobs/{id}")).await?;
    let job = check(response).await?;
    print_pretty(&job);
    Ok(())
}

pub async fn cancel(api_url: &str, queue: &str, id: &str) -> Result<()> {
    let response = reqwest::Client::new()
        .delete(format!("{api_url}/api/queues/{queue}/jobs/{id}"))
        .send()
        .await?;
    check(response).await?;
    println!("cancelled {id}");
    Ok(())
}

pub async fn retry(api_url: &str, queue: &str, id: &str) -> Result<()> {
    let response = reqwest::Client::new()
        .post(format!("{api_url}/api/queues/{queue}/jobs/{id}/retry"))
        .send()
        .await?;
    let job = check(response).await?;
    println!("re-enqueued {id} ({})", job["status"].as_str().unwrap_or("?"));
    Ok(())
}

pub async fn stats(api_url: &str, queue: Option<&str>) -> Result<()> {
    let url = match queue {
        Some(queue) => format!("{api_url}/api/queues/{queue}/stats"),
        None => format!("{api_url}/api/stats"),
    };
    let response = reqwest::get(url).await?;
    let stats = check(response).await?;
    print_pretty(&stats);
    Ok(())
}

/// Poll the job record until it reaches a terminal state, printing each
/// progress change. Polling is the durable fallback to the event stream.
pub async fn watch(api_url: &str, queue: &str, id: &str, interval_ms: u64) -> Result<()> {
    let client = reqwest::Client::new();
    let mut last_line = String::new();

    loop {
        let response = client
            .get(format!("{api_url}/api/queues/{queue}/jobs/{id}"))
            .send()
            .await?;
        let job = check(response).await?;

        let status = job["status"].as_str().unwrap_or("?");
        let line = format!(
            "{status} {}% {} {}",
            job["progress"]["percentage"],
            job["progress"]["stage"].as_str().unwrap_or(""),
            job["progress"]["message"].as_str().unwrap_or(""),
        );
        if line != last_line {
            println!("{line}");
            last_line = line;
        }

        match status {
            "completed" => {
                if let Some(result) = job.get("result") {
                    print_pretty(result);
                }
                return Ok(());
            }
            "failed" => {
                if let Some(failure) = job.get("failure") {
                    print_pretty(failure);
                }
                bail!("job {id} failed");
            }
            "removed" => bail!("job {id} was removed"),
            _ => tokio::time::sleep(std::time::Duration::from_millis(interval_ms)).await,
        }
    }
}
