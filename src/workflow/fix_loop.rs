//! 修复循环的记账
//!
//! 每个内容片段一个 `FixLoop`。每次校验结果交给 `record`，得到三种结果之一：
//! 通过 / 需要修复 / 次数用尽。`max_attempts` 统计的是校验次数（含首次）。

use crate::infrastructure::VerifyReport;

/// 一次校验后的下一步
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixStep {
    Verified,
    /// 带上错误信息去请求修复
    NeedsFix(String),
    /// 次数用尽，附最后一次的错误信息
    Exhausted(String),
}

#[derive(Debug, Clone)]
pub struct FixLoop {
    max_attempts: u32,
    attempts: u32,
    last_error: Option<String>,
}

impl FixLoop {
    /// `max_attempts` 至少为 1
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempts: 0,
            last_error: None,
        }
    }

    pub fn record(&mut self, report: &VerifyReport) -> FixStep {
        self.attempts += 1;
        if report.ok {
            return FixStep::Verified;
        }

        let error = report
            .error_message
            .clone()
            .unwrap_or_else(|| "校验未通过（无错误信息）".to_string());
        self.last_error = Some(error.clone());

        if self.attempts >= self.max_attempts {
            FixStep::Exhausted(error)
        } else {
            FixStep::NeedsFix(error)
        }
    }

    /// 已经做过的校验次数
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_then_pass_within_budget() {
        let mut fix = FixLoop::new(2);
        assert_eq!(fix.record(&VerifyReport::failed("e1")), FixStep::NeedsFix("e1".into()));
        assert_eq!(fix.record(&VerifyReport::passed()), FixStep::Verified);
        assert_eq!(fix.attempts(), 2);
        assert_eq!(fix.last_error(), Some("e1"));
    }

    #[test]
    fn test_exhausted_after_max_checks() {
        let mut fix = FixLoop::new(2);
        assert!(matches!(fix.record(&VerifyReport::failed("e1")), FixStep::NeedsFix(_)));
        assert_eq!(fix.record(&VerifyReport::failed("e2")), FixStep::Exhausted("e2".into()));
        assert_eq!(fix.attempts(), 2);
    }

    #[test]
    fn test_zero_is_treated_as_one() {
        let mut fix = FixLoop::new(0);
        assert!(matches!(fix.record(&VerifyReport::failed("e")), FixStep::Exhausted(_)));
    }
}
