use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use exam_extract::models::loaders::artifact_store::result_file_name;
use exam_extract::utils::logging;
use exam_extract::{Capabilities, Config, DocumentPair, Pipeline};
use tracing::{info, warn};

const USAGE: &str = "用法: exam-extract <paper.pdf> <solution.pdf> [exam_id] [output_dir]";
const CONFIG_ENV: &str = "EXAM_PROCESSOR_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 || args.len() > 4 {
        bail!(USAGE);
    }

    // 加载配置：默认值 → 可选 TOML 文件 → 环境变量
    let config_path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("加载配置失败")?;

    // 初始化日志
    logging::init(config.verbose_logging);
    config.validate().context("配置校验失败")?;
    if config.llm_api_key.is_empty() {
        warn!("⚠️ 未设置 API Key（EXAM_PROCESSOR_OPENAI_API_KEY / OPENAI_API_KEY）");
    }
    logging::log_startup(&config);

    let pair = DocumentPair::new(&args[0], &args[1]);
    let exam_id = args.get(2).cloned();
    let output_dir = args.get(3).map(PathBuf::from);

    let capabilities = Capabilities::openai(&config);
    let pipeline = Pipeline::new(config, capabilities);

    // Ctrl-C：停止调度新题，已开始的题目继续完成
    let cancel = pipeline.cancel_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("⚠️ 收到中断信号，等待进行中的题目完成...");
            cancel.cancel();
        }
    });

    let document = pipeline
        .run(&pair, exam_id, output_dir.clone())
        .await
        .context("处理试卷失败")?;

    let result_path = pipeline
        .artifact_root(&document.exam_id, output_dir)
        .join(result_file_name(&document.exam_id));
    logging::print_final_stats(&document, &result_path);
    info!("✅ 处理完成");

    Ok(())
}
