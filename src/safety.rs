//! 安全控制器 - 轮次预算
//!
//! 限制单次外部能力调用可以消耗的内部轮次。
//!
//! - `TurnGuard` 是一个普通的值，每次调用单独创建，以 `&mut` 形式传入能力层
//! - 并发的提取任务各自持有自己的 guard，互不共享计数
//! - 可选的单次尝试超时（`with_deadline`）到期后按预算耗尽处理
//! - 顺带记录这次调用消耗的 token，调用方结束后通过 `usage()` 读取

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::models::TokenUsage;

/// 预算耗尽的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetKind {
    /// 轮次用完
    Turns,
    /// 单次尝试超时
    Deadline,
}

/// 预算耗尽错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct BudgetExceeded {
    pub scope: String,
    pub kind: BudgetKind,
    /// 轮次上限；超时情况下为 0
    pub max_turns: u32,
    pub timeout: Option<Duration>,
}

impl fmt::Display for BudgetExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            BudgetKind::Turns => write!(
                f,
                "[{}] 轮次预算耗尽 (上限 {} 轮)",
                self.scope, self.max_turns
            ),
            BudgetKind::Deadline => write!(
                f,
                "[{}] 单次尝试超时 ({:?})",
                self.scope,
                self.timeout.unwrap_or_default()
            ),
        }
    }
}

/// 轮次守卫
#[derive(Debug, Clone)]
pub struct TurnGuard {
    scope: String,
    max_turns: u32,
    used: u32,
    input_tokens: u64,
    output_tokens: u64,
}

impl TurnGuard {
    /// 创建新的守卫
    pub fn new(max_turns: u32) -> Self {
        Self::scoped("llm", max_turns)
    }

    /// 创建带作用域名称的守卫（仅用于日志与错误信息）
    pub fn scoped(scope: impl Into<String>, max_turns: u32) -> Self {
        Self {
            scope: scope.into(),
            max_turns,
            used: 0,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    /// 消耗一轮
    ///
    /// 返回本次是第几轮（从 1 开始）；达到上限时返回 `BudgetExceeded`，计数不再增加
    pub fn charge(&mut self) -> Result<u32, BudgetExceeded> {
        if self.used >= self.max_turns {
            warn!("⚠️ [{}] 轮次预算耗尽: {}/{}", self.scope, self.used, self.max_turns);
            return Err(BudgetExceeded {
                scope: self.scope.clone(),
                kind: BudgetKind::Turns,
                max_turns: self.max_turns,
                timeout: None,
            });
        }
        self.used += 1;
        debug!("[{}] 第 {}/{} 轮", self.scope, self.used, self.max_turns);
        Ok(self.used)
    }

    /// 记录一次请求回报的 token 数
    pub fn record_tokens(&mut self, input_tokens: u64, output_tokens: u64) {
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
    }

    /// 累计用量，请求数即已消耗的轮次
    pub fn usage(&self) -> TokenUsage {
        TokenUsage {
            requests: self.used,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }

    /// 清零，便于复用
    pub fn reset(&mut self) {
        self.used = 0;
        self.input_tokens = 0;
        self.output_tokens = 0;
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn remaining(&self) -> u32 {
        self.max_turns.saturating_sub(self.used)
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

/// 为一次尝试套上墙钟超时；`timeout` 为 `None` 时直接执行
///
/// 超时后返回 `BudgetKind::Deadline` 类型的 `BudgetExceeded`
pub async fn with_deadline<F, T, E>(scope: &str, timeout: Option<Duration>, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<BudgetExceeded>,
{
    let Some(limit) = timeout else {
        return fut.await;
    };
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("⚠️ [{}] 单次尝试超过 {:?}", scope, limit);
            Err(BudgetExceeded {
                scope: scope.to_string(),
                kind: BudgetKind::Deadline,
                max_turns: 0,
                timeout: Some(limit),
            }
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_until_exhausted() {
        let mut guard = TurnGuard::scoped("test", 3);
        assert_eq!(guard.charge().unwrap(), 1);
        assert_eq!(guard.charge().unwrap(), 2);
        assert_eq!(guard.charge().unwrap(), 3);

        let err = guard.charge().unwrap_err();
        assert_eq!(err.kind, BudgetKind::Turns);
        assert_eq!(err.max_turns, 3);
        assert_eq!(err.scope, "test");
        // 失败的 charge 不计数
        assert_eq!(guard.used(), 3);
        assert_eq!(guard.remaining(), 0);
    }

    #[test]
    fn test_zero_budget_fails_first_charge() {
        let mut guard = TurnGuard::new(0);
        assert!(guard.charge().is_err());
    }

    #[test]
    fn test_reset_clears_usage() {
        let mut guard = TurnGuard::new(1);
        guard.charge().unwrap();
        assert!(guard.charge().is_err());

        guard.record_tokens(10, 2);
        guard.reset();
        assert_eq!(guard.used(), 0);
        assert_eq!(guard.usage(), TokenUsage::default());
        assert_eq!(guard.charge().unwrap(), 1);
    }

    #[test]
    fn test_guards_are_independent() {
        let mut a = TurnGuard::new(1);
        let mut b = TurnGuard::new(1);
        a.charge().unwrap();
        assert!(b.charge().is_ok());
        assert!(a.charge().is_err());
    }

    #[test]
    fn test_usage_counts_turns_and_tokens() {
        let mut guard = TurnGuard::scoped("usage", 5);
        guard.charge().unwrap();
        guard.record_tokens(1200, 300);
        guard.charge().unwrap();
        guard.record_tokens(800, 0);

        let usage = guard.usage();
        assert_eq!(usage.requests, 2);
        assert_eq!(usage.input_tokens, 2000);
        assert_eq!(usage.total_tokens(), 2300);
    }

    #[tokio::test]
    async fn test_deadline_maps_to_budget_exceeded() {
        let result: Result<(), BudgetExceeded> =
            with_deadline("slow", Some(Duration::from_millis(10)), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, BudgetKind::Deadline);
        assert_eq!(err.timeout, Some(Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn test_without_deadline_runs_to_completion() {
        let result: Result<u32, BudgetExceeded> = with_deadline("fast", None, async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
