//! 模型调用用量：请求数、token、耗时与估算费用
//!
//! - `TokenUsage`：一次能力调用内累计的原始计数，由轮次守卫收集
//! - `UsageLedger`：按步骤名累计（分类、枚举、提取、修复……）
//! - `UsageReport`：整套试卷的汇总，写入最终结果

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 每百万 token 的美元单价
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Pricing {
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 / 1_000_000.0 * self.input_per_million
            + output_tokens as f64 / 1_000_000.0 * self.output_per_million
    }
}

/// 请求数与 token 计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub requests: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.requests += other.requests;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// 单个步骤的用量
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepUsage {
    pub step: String,
    pub requests: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub duration_seconds: f64,
    pub estimated_cost_usd: f64,
}

impl StepUsage {
    pub fn new(step: impl Into<String>, tokens: TokenUsage, elapsed: Duration, pricing: &Pricing) -> Self {
        Self {
            step: step.into(),
            requests: tokens.requests,
            input_tokens: tokens.input_tokens,
            output_tokens: tokens.output_tokens,
            total_tokens: tokens.total_tokens(),
            duration_seconds: elapsed.as_secs_f64(),
            estimated_cost_usd: pricing.cost(tokens.input_tokens, tokens.output_tokens),
        }
    }

    fn add(&mut self, other: &StepUsage) {
        self.requests += other.requests;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        self.duration_seconds += other.duration_seconds;
        self.estimated_cost_usd += other.estimated_cost_usd;
    }
}

/// 按步骤累计的账本，步骤按首次出现的顺序排列
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageLedger {
    steps: Vec<StepUsage>,
}

impl UsageLedger {
    pub fn record(&mut self, step: &str, tokens: TokenUsage, elapsed: Duration, pricing: &Pricing) {
        self.absorb(StepUsage::new(step, tokens, elapsed, pricing));
    }

    /// 同名步骤累加，否则追加
    pub fn absorb(&mut self, usage: StepUsage) {
        match self.steps.iter_mut().find(|s| s.step == usage.step) {
            Some(existing) => existing.add(&usage),
            None => self.steps.push(usage),
        }
    }

    pub fn merge(&mut self, other: &UsageLedger) {
        for step in &other.steps {
            self.absorb(step.clone());
        }
    }

    pub fn steps(&self) -> &[StepUsage] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&StepUsage> {
        self.steps.iter().find(|s| s.step == name)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn total(&self) -> StepUsage {
        let mut total = StepUsage {
            step: "total".to_string(),
            ..StepUsage::default()
        };
        for step in &self.steps {
            total.add(step);
        }
        total
    }
}

/// 整套试卷的用量汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    pub model: String,
    pub pricing: Pricing,
    pub steps: Vec<StepUsage>,
    pub total: StepUsage,
}

impl UsageReport {
    pub fn new(model: impl Into<String>, pricing: Pricing, ledger: UsageLedger) -> Self {
        let total = ledger.total();
        Self {
            model: model.into(),
            pricing,
            steps: ledger.steps,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRICING: Pricing = Pricing {
        input_per_million: 2.0,
        output_per_million: 10.0,
    };

    fn tokens(requests: u32, input: u64, output: u64) -> TokenUsage {
        TokenUsage {
            requests,
            input_tokens: input,
            output_tokens: output,
        }
    }

    #[test]
    fn test_cost_per_million() {
        let cost = PRICING.cost(500_000, 100_000);
        assert!((cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_ledger_merges_same_step() {
        let mut item_a = UsageLedger::default();
        item_a.record("extract", tokens(1, 1000, 200), Duration::from_secs(2), &PRICING);
        item_a.record("fix_question", tokens(1, 300, 50), Duration::from_secs(1), &PRICING);

        let mut item_b = UsageLedger::default();
        item_b.record("extract", tokens(2, 1500, 300), Duration::from_secs(3), &PRICING);

        let mut ledger = UsageLedger::default();
        ledger.record("classification", tokens(1, 4000, 100), Duration::from_secs(1), &PRICING);
        ledger.merge(&item_a);
        ledger.merge(&item_b);

        let names: Vec<&str> = ledger.steps().iter().map(|s| s.step.as_str()).collect();
        assert_eq!(names, vec!["classification", "extract", "fix_question"]);

        let extract = ledger.step("extract").unwrap();
        assert_eq!(extract.requests, 3);
        assert_eq!(extract.input_tokens, 2500);
        assert_eq!(extract.total_tokens, 3000);
        assert!((extract.duration_seconds - 5.0).abs() < 1e-9);

        let report = UsageReport::new("gpt-5", PRICING, ledger);
        assert_eq!(report.total.requests, 5);
        assert_eq!(report.total.input_tokens, 6800);
        assert_eq!(report.total.output_tokens, 650);
        let expected = PRICING.cost(6800, 650);
        assert!((report.total.estimated_cost_usd - expected).abs() < 1e-9);
    }

    #[test]
    fn test_ledger_serializes_as_step_list() {
        let mut ledger = UsageLedger::default();
        ledger.record("extract", tokens(1, 10, 5), Duration::ZERO, &PRICING);

        let value = serde_json::to_value(&ledger).unwrap();
        assert_eq!(value[0]["step"], "extract");
        assert_eq!(value[0]["total_tokens"], 15);
        assert_eq!(serde_json::from_value::<UsageLedger>(value).unwrap(), ledger);
    }
}
