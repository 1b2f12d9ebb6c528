use anyhow::Result;
use glass_pilot::agent::DiskSnapshotStore;
use glass_pilot::ocr::{HttpTextDetector, OcrConfig};
use glass_pilot::{Agent, AgentConfig, AppEntry, BrowserConfig, ChromiumComputer, JsonKnowledgeStore, LlmConfig, OpenAiClient};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let browser_cfg = BrowserConfig {
        headless: false,
        apps: vec![
            AppEntry::new("Calculator", "https://www.desmos.com/scientific"),
            AppEntry::new("Wikipedia", "https://en.wikipedia.org"),
        ],
        ..BrowserConfig::default()
    };
    let computer = match std::env::var("CHROME_WS_URL") {
        Ok(ws) if !ws.trim().is_empty() => ChromiumComputer::connect(&ws, browser_cfg).await?,
        _ => ChromiumComputer::launch(browser_cfg).await?,
    };

    let llm = Arc::new(OpenAiClient::new(LlmConfig::default())?);
    let mut cfg = AgentConfig::from_env()?;
    let knowledge = JsonKnowledgeStore::new(cfg.knowledge_dir.clone());
    let runs_dir = std::env::temp_dir().join("glass_pilot_runs");

    // OCR fusion only when a text-detection server is configured
    let ocr = match std::env::var("OCR_SERVER_URL") {
        Ok(_) => Some(HttpTextDetector::new(OcrConfig::default())?),
        Err(_) => None,
    };
    cfg.grounding.ocr_fusion = ocr.is_some();

    let mut agent = Agent::new(computer, llm.clone(), llm.clone(), knowledge, cfg)
        .with_snapshot_store(Arc::new(DiskSnapshotStore::new(&runs_dir)));
    if let Some(detector) = ocr {
        agent = agent.with_text_detector(Arc::new(detector));
    }

    let goal = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Open Calculator and compute 6 times 7".to_string());
    let report = agent.run(&goal).await?;

    info!(status = ?report.status, turns = report.metrics.turns, cost = llm.cost(), "done");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
