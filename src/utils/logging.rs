/// 日志工具模块
///
/// 提供日志初始化和输出的辅助函数
use std::fmt::Display;
use std::path::Path;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::ProcessedDocument;

/// 初始化日志
///
/// 优先使用 `RUST_LOG`；未设置时按 `verbose` 选择 debug / info。
/// 重复初始化（例如测试中）会被忽略。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("exam_extract={default_level},warn")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 试卷题目提取");
    info!(
        "启动时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("🤖 模型: {}", config.llm_model_name);
    info!("📊 最大并发数: {}", config.max_concurrent_questions);
    info!(
        "🔧 每题轮次上限: {}，校验次数上限: {}",
        config.max_turns_per_question, config.max_fix_attempts
    );
    info!("{}", "=".repeat(60));
}

/// 记录流水线阶段切换
pub fn log_stage(exam_id: &str, stage: impl Display) {
    info!("[试卷 {}] ▶ 阶段: {}", exam_id, stage);
}

/// 打印最终统计信息
///
/// # 参数
/// - `document`: 最终结果
/// - `result_path`: 结果文件路径
pub fn print_final_stats(document: &ProcessedDocument, result_path: &Path) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("📄 试卷: {} ({})", document.exam_id, document.exam_type);
    info!(
        "✅ 成功: {}/{} (通过校验 {})",
        document.success_count(),
        document.total_attempted,
        document.verified_count()
    );
    info!("❌ 失败: {} {:?}", document.failure_count(), document.failed_labels);
    for warning in &document.warnings {
        info!("⚠️ {}", warning);
    }
    info!("⏱️ 耗时: {:.1} 秒", document.elapsed_seconds);

    let usage = &document.usage;
    info!("💰 模型用量 ({})", usage.model);
    info!(
        "   总计: 请求 {} 次, token {} (输入 {}, 输出 {}), 调用耗时 {:.2} 秒, 估算费用 ${:.4}",
        usage.total.requests,
        usage.total.total_tokens,
        usage.total.input_tokens,
        usage.total.output_tokens,
        usage.total.duration_seconds,
        usage.total.estimated_cost_usd
    );
    for step in &usage.steps {
        info!(
            "   - {}: 请求 {} 次, token {}, 耗时 {:.2} 秒, ${:.4}",
            step.step,
            step.requests,
            step.total_tokens,
            step.duration_seconds,
            step.estimated_cost_usd
        );
    }
    info!("{}", "=".repeat(60));
    info!("\n结果已保存至: {}", result_path.display());
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度（按字符计）
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text_counts_chars() {
        assert_eq!(truncate_text("短文本", 10), "短文本");
        assert_eq!(truncate_text("一二三四五", 3), "一二三...");
    }
}
