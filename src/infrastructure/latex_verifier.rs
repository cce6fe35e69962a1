//! LaTeX 校验 - 基础设施层
//!
//! 两级检查：
//! 1. 结构检查（括号、环境、数学模式、`\item` 开头）
//! 2. 可选的真实编译：包进最小 article 文档，在临时目录里跑编译器

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::CapabilityError;
use crate::models::ContentKind;

/// 校验结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub ok: bool,
    pub error_message: Option<String>,
}

impl VerifyReport {
    pub fn passed() -> Self {
        Self {
            ok: true,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error_message: Some(message.into()),
        }
    }
}

/// 编译 / 校验能力
#[async_trait]
pub trait ContentVerifier: Send + Sync {
    async fn check(&self, content: &str, kind: ContentKind)
        -> Result<VerifyReport, CapabilityError>;
}

/// LaTeX 校验器
pub struct LatexVerifier {
    compiler: Option<String>,
    timeout: Duration,
}

impl LatexVerifier {
    /// `compiler` 为 `None` 时只做结构检查
    pub fn new(compiler: Option<&str>, timeout: Option<Duration>) -> Self {
        Self {
            compiler: compiler.map(str::to_string),
            timeout: timeout.unwrap_or(Duration::from_secs(60)),
        }
    }

    async fn compile(
        &self,
        compiler: &str,
        content: &str,
        kind: ContentKind,
    ) -> Result<VerifyReport, CapabilityError> {
        let tool_error = |message: String| CapabilityError::Tool {
            tool: compiler.to_string(),
            message,
        };

        let scratch = tempfile::tempdir().map_err(|e| tool_error(e.to_string()))?;
        let tex_path = scratch.path().join("piece.tex");
        tokio::fs::write(&tex_path, wrap_document(content, kind))
            .await
            .map_err(|e| tool_error(e.to_string()))?;

        let run = Command::new(compiler)
            .args(["-interaction=nonstopmode", "-halt-on-error", "piece.tex"])
            .current_dir(scratch.path())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result.map_err(|e| tool_error(format!("无法启动: {}", e)))?,
            Err(_) => {
                return Ok(VerifyReport::failed(format!(
                    "编译超过 {:?} 未结束",
                    self.timeout
                )))
            }
        };

        if output.status.success() {
            return Ok(VerifyReport::passed());
        }

        let log = tokio::fs::read_to_string(scratch.path().join("piece.log"))
            .await
            .unwrap_or_else(|_| String::from_utf8_lossy(&output.stdout).into_owned());
        Ok(VerifyReport::failed(
            first_log_error(&log).unwrap_or_else(|| "编译失败（日志中没有错误行）".to_string()),
        ))
    }
}

#[async_trait]
impl ContentVerifier for LatexVerifier {
    async fn check(
        &self,
        content: &str,
        kind: ContentKind,
    ) -> Result<VerifyReport, CapabilityError> {
        if let Err(message) = check_structure(content, kind) {
            debug!("{} 结构检查未通过: {}", kind, message);
            return Ok(VerifyReport::failed(message));
        }

        match &self.compiler {
            Some(compiler) => self.compile(compiler, content, kind).await,
            None => Ok(VerifyReport::passed()),
        }
    }
}

/// 包成可独立编译的文档；draft 模式下图片占位符不需要真实文件
///
/// 题目以 `\item` 开头，需要放进列表环境
fn wrap_document(content: &str, kind: ContentKind) -> String {
    let body = match kind {
        ContentKind::Question => format!("\\begin{{enumerate}}\n{}\n\\end{{enumerate}}", content),
        ContentKind::Answer => content.to_string(),
    };
    format!(
        "\\documentclass{{article}}\n\
         \\usepackage{{amsmath,amssymb}}\n\
         \\usepackage[draft]{{graphicx}}\n\
         \\begin{{document}}\n\
         {}\n\
         \\end{{document}}\n",
        body
    )
}

/// 取日志里第一条 `! ` 错误及其后的 `l.N` 定位
fn first_log_error(log: &str) -> Option<String> {
    let mut lines = log.lines();
    let error = lines.find(|l| l.starts_with("! "))?.trim_start_matches("! ").to_string();
    let location = lines.take(8).find(|l| l.starts_with("l."));
    Some(match location {
        Some(loc) => format!("{} ({})", error, loc.trim()),
        None => error,
    })
}

/// 结构检查
pub fn check_structure(content: &str, kind: ContentKind) -> Result<(), String> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return Err(format!("{} 内容为空", kind));
    }
    if kind == ContentKind::Question && !trimmed.starts_with("\\item") {
        return Err("题目内容必须以 \\item 开头".to_string());
    }

    let mut depth: i64 = 0;
    let mut dollars = 0usize;
    let mut chars = content.char_indices().peekable();
    let mut environments: Vec<String> = Vec::new();

    while let Some((pos, c)) = chars.next() {
        match c {
            '\\' => {
                // 转义字符整体跳过
                let Some(&(_, next)) = chars.peek() else { break };
                if !next.is_ascii_alphabetic() {
                    chars.next();
                    continue;
                }
                let rest = &content[pos + 1..];
                if let Some(name) = environment_name(rest, "begin") {
                    environments.push(name);
                } else if let Some(name) = environment_name(rest, "end") {
                    match environments.pop() {
                        Some(open) if open == name => {}
                        Some(open) => {
                            return Err(format!(
                                "环境不匹配: \\begin{{{}}} 被 \\end{{{}}} 关闭",
                                open, name
                            ))
                        }
                        None => return Err(format!("多余的 \\end{{{}}}", name)),
                    }
                }
            }
            '%' => {
                // 注释到行尾
                for (_, c) in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err("多余的右花括号 }".to_string());
                }
            }
            '$' => dollars += 1,
            _ => {}
        }
    }

    if depth != 0 {
        return Err(format!("花括号不匹配，缺少 {} 个 }}", depth));
    }
    if let Some(open) = environments.pop() {
        return Err(format!("\\begin{{{}}} 没有对应的 \\end", open));
    }
    if dollars % 2 != 0 {
        return Err("数学模式 $ 不成对".to_string());
    }
    Ok(())
}

/// `begin{name}...` → `name`
fn environment_name(rest: &str, command: &str) -> Option<String> {
    let after = rest.strip_prefix(command)?.strip_prefix('{')?;
    let end = after.find('}')?;
    Some(after[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_accepts_well_formed_piece() {
        let q = "\\item Solve $x^2 = 4$.\n\\begin{enumerate}\n\\item (i) \\{a\\}\n\\end{enumerate}";
        assert_eq!(check_structure(q, ContentKind::Question), Ok(()));
        assert_eq!(check_structure("$x = \\frac{1}{2}$ % note {", ContentKind::Answer), Ok(()));
    }

    #[test]
    fn test_structure_rejects_common_breakage() {
        assert!(check_structure("Solve x", ContentKind::Question).is_err());
        assert!(check_structure("\\item \\frac{1}{2", ContentKind::Question).is_err());
        assert!(check_structure("\\item $x", ContentKind::Question).is_err());
        assert!(check_structure(
            "\\item \\begin{align} x \\end{enumerate}",
            ContentKind::Question
        )
        .is_err());
        assert!(check_structure("   ", ContentKind::Answer).is_err());
    }

    #[test]
    fn test_first_log_error() {
        let log = "This is pdfTeX\n! Undefined control sequence.\nl.7 \\foo\n";
        assert_eq!(
            first_log_error(log).as_deref(),
            Some("Undefined control sequence. (l.7 \\foo)")
        );
        assert_eq!(first_log_error("all good"), None);
    }

    #[tokio::test]
    async fn test_structural_only_verifier() {
        let verifier = LatexVerifier::new(None, None);
        let report = verifier
            .check("\\item What is $1+1$?", ContentKind::Question)
            .await
            .unwrap();
        assert!(report.ok);

        let report = verifier.check("\\item {", ContentKind::Question).await.unwrap();
        assert!(!report.ok);
        assert!(report.error_message.is_some());
    }
}
