use std::path::Path;

use anyhow::Context;

use vsum_media::check_tool;
use vsum_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env().context("loading worker config")?;

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;
    for tool in ["yt-dlp", "ffmpeg", "whisper"] {
        let path = check_tool(tool).map_err(|e| anyhow::anyhow!("{}", e))?;
        println!("worker-selfcheck: {} -> {}", tool, path.display());
    }
    if let Some(cookies) = &config.ytdlp_cookies {
        if !cookies.is_file() {
            return Err(anyhow::anyhow!(
                "cookies file not found: {}",
                cookies.display()
            ));
        }
    }
    ensure_env_present(&["REDIS_URL"])?;
    if std::env::var("OPENAI_API_KEY").is_err() {
        println!("worker-selfcheck: OPENAI_API_KEY unset, summaries will be unavailable");
    }

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    let probe = path.join(".selfcheck");
    tokio::fs::write(&probe, b"ok").await?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
