//! 规则引擎门面
//!
//! 组合规则存储与执行器，提供单规则、全量批量与规则集三种评估入口。
//! 评估本身无状态、无副作用：相同的（规则快照, 事件）输入总是产出
//! 相同的有序结果，可以安全地在多线程间并发调用。

use crate::compiler::{CompiledRule, RuleCompiler};
use crate::error::{Result, RuleError};
use crate::executor::{EvaluationPolicy, RuleExecutor};
use crate::models::{
    EvaluationContext, Rule, RuleEvaluationResult, SetEvaluation, SkipReason, SkippedRule,
};
use crate::store::RuleStore;
use tracing::{debug, info, instrument, warn};

/// 规则引擎
pub struct RuleEngine {
    store: RuleStore,
    executor: RuleExecutor,
}

impl RuleEngine {
    pub fn new(store: RuleStore) -> Self {
        Self {
            store,
            executor: RuleExecutor::new(),
        }
    }

    /// 使用自定义评估策略
    pub fn with_policy(store: RuleStore, policy: EvaluationPolicy) -> Self {
        Self {
            store,
            executor: RuleExecutor::with_policy(policy),
        }
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    /// 评估单条已加载的规则
    ///
    /// 规则不存在或事件数据非法时立即返回错误，不产出部分结果。
    #[instrument(skip(self, context), fields(rule_id = rule_id))]
    pub fn evaluate_rule(
        &self,
        rule_id: &str,
        context: &EvaluationContext,
    ) -> Result<RuleEvaluationResult> {
        Self::check_event(context)?;

        let rule = self
            .store
            .get(rule_id)
            .ok_or_else(|| RuleError::RuleNotFound(rule_id.to_string()))?;

        Ok(self.executor.execute(&rule, context))
    }

    /// 试运行一条未入库的规则
    ///
    /// 规则即时编译（校验不通过即报错），不会写入存储。
    #[instrument(skip(self, rule, context), fields(rule_name = %rule.name))]
    pub fn test_rule(
        &self,
        rule: Rule,
        context: &EvaluationContext,
    ) -> Result<RuleEvaluationResult> {
        Self::check_event(context)?;

        let compiled = RuleCompiler::new().compile(rule)?;
        Ok(self.executor.execute(&compiled, context))
    }

    /// 批量评估所有已启用的规则
    ///
    /// 返回值只包含匹配的规则结果，按规则 ID 排序保证可复现。
    #[instrument(skip(self, context))]
    pub fn evaluate_rules(
        &self,
        context: &EvaluationContext,
    ) -> Result<Vec<RuleEvaluationResult>> {
        let mut candidates = self.store.list_all();
        candidates.sort_by(|a, b| a.id().cmp(b.id()));

        self.evaluate_candidates(&candidates, context)
    }

    /// 批量评估调用方给定的候选规则
    ///
    /// 候选过滤（区域 / 租户 / 类别）是上层查询的职责，这里只负责
    /// 兜底跳过禁用规则。候选之间相互独立：单条规则的评估故障不
    /// 影响其他规则，未匹配的规则不出现在结果里。
    #[instrument(skip_all, fields(candidates = candidates.len()))]
    pub fn evaluate_candidates(
        &self,
        candidates: &[CompiledRule],
        context: &EvaluationContext,
    ) -> Result<Vec<RuleEvaluationResult>> {
        Self::check_event(context)?;

        let mut results = Vec::new();
        for rule in candidates {
            if !rule.is_enabled() {
                debug!(rule_id = rule.id(), "规则已禁用，跳过评估");
                continue;
            }

            let result = self.executor.execute(rule, context);
            if result.matched {
                results.push(result);
            }
        }

        info!(
            candidates = candidates.len(),
            matched = results.len(),
            "批量评估完成"
        );
        Ok(results)
    }

    /// 评估规则集
    ///
    /// 按规则集声明顺序评估引用的规则；悬空引用与禁用规则跳过
    /// 并记入 `skipped`。`total_score` 为匹配规则分值之和。
    #[instrument(skip(self, context), fields(set_id = set_id))]
    pub fn evaluate_set(
        &self,
        set_id: &str,
        context: &EvaluationContext,
    ) -> Result<SetEvaluation> {
        Self::check_event(context)?;

        let set = self
            .store
            .get_set(set_id)
            .ok_or_else(|| RuleError::RuleSetNotFound(set_id.to_string()))?;

        let mut evaluation = SetEvaluation {
            set_id: set.id.clone(),
            set_name: set.name.clone(),
            results: Vec::new(),
            skipped: Vec::new(),
            total_score: 0.0,
        };

        if !set.enabled {
            info!("规则集已禁用，跳过评估");
            return Ok(evaluation);
        }

        for rule_id in &set.rules {
            let Some(rule) = self.store.get(rule_id) else {
                // 规则被外部删除后留下的悬空引用：跳过并告警，不中断
                warn!(rule_id = rule_id.as_str(), "规则集引用的规则不存在，跳过");
                evaluation.skipped.push(SkippedRule {
                    rule_id: rule_id.clone(),
                    reason: SkipReason::NotFound,
                });
                continue;
            };

            if !rule.is_enabled() {
                debug!(rule_id = rule.id(), "规则已禁用，跳过评估");
                evaluation.skipped.push(SkippedRule {
                    rule_id: rule_id.clone(),
                    reason: SkipReason::Disabled,
                });
                continue;
            }

            let result = self.executor.execute(&rule, context);
            if result.matched {
                evaluation.total_score += result.score;
                evaluation.results.push(result);
            }
        }

        info!(
            matched = evaluation.results.len(),
            skipped = evaluation.skipped.len(),
            total_score = evaluation.total_score,
            "规则集评估完成"
        );
        Ok(evaluation)
    }

    /// 事件根节点必须是 JSON 对象，其余形态属于调用方错误
    fn check_event(context: &EvaluationContext) -> Result<()> {
        if !context.has_object_root() {
            return Err(RuleError::InvalidEvent(
                "事件根节点必须是 JSON 对象".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, Condition, ConditionGroup, RuleSet, Severity};
    use crate::operators::Operator;
    use serde_json::json;

    fn transfer_context() -> EvaluationContext {
        EvaluationContext::new(json!({
            "event": {"type": "TRANSFER"},
            "amount": 1500,
            "country": "AO",
            "geo": {"lat": 0.05, "lon": 0.05}
        }))
    }

    fn engine_with_rules(rules: Vec<Rule>) -> RuleEngine {
        let store = RuleStore::new();
        store.load_batch(rules).unwrap();
        RuleEngine::new(store)
    }

    fn high_value_foreign(id: &str) -> Rule {
        Rule::new("high_value_foreign")
            .with_id(id)
            .with_group(ConditionGroup::and(vec![
                Condition::new("amount", Operator::Gt, 1000),
                Condition::new("country", Operator::NotIn, json!(["US", "PT"])),
            ]))
            .with_score(50.0)
            .with_actions(vec![Action::Block])
            .with_severity(Severity::High)
    }

    #[test]
    fn test_evaluate_rule_matches() {
        let engine = engine_with_rules(vec![high_value_foreign("rule-001")]);

        let result = engine
            .evaluate_rule("rule-001", &transfer_context())
            .unwrap();

        assert!(result.matched);
        assert_eq!(result.score, 50.0);
        assert_eq!(result.actions, vec![Action::Block]);
        assert_eq!(result.severity, Severity::High);
    }

    #[test]
    fn test_evaluate_rule_not_found() {
        let engine = engine_with_rules(vec![]);
        let result = engine.evaluate_rule("missing", &transfer_context());
        assert!(matches!(result, Err(RuleError::RuleNotFound(_))));
    }

    #[test]
    fn test_invalid_event_root_rejected() {
        let engine = engine_with_rules(vec![high_value_foreign("rule-001")]);

        for bad in [json!([1, 2, 3]), json!("event"), json!(42), json!(null)] {
            let ctx = EvaluationContext::new(bad);
            let result = engine.evaluate_rule("rule-001", &ctx);
            assert!(matches!(result, Err(RuleError::InvalidEvent(_))));
        }
    }

    #[test]
    fn test_evaluate_rules_returns_only_matches() {
        let matching = high_value_foreign("rule-001");
        let non_matching = Rule::new("huge_amount")
            .with_id("rule-002")
            .with_condition(Condition::new("amount", Operator::Gt, 100_000))
            .with_score(90.0);

        let engine = engine_with_rules(vec![matching, non_matching]);
        let results = engine.evaluate_rules(&transfer_context()).unwrap();

        // 未匹配的规则不出现在结果里
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rule_id, "rule-001");
    }

    #[test]
    fn test_disabled_rule_never_evaluated() {
        let disabled = high_value_foreign("rule-001").disabled();
        let engine = engine_with_rules(vec![disabled]);

        let results = engine.evaluate_rules(&transfer_context()).unwrap();
        // 禁用规则不评估，更不会以"评估为假"的形式出现
        assert!(results.is_empty());
    }

    #[test]
    fn test_evaluate_rules_ordering_is_deterministic() {
        let rules: Vec<Rule> = (0..5)
            .map(|i| {
                Rule::new(format!("rule_{}", i))
                    .with_id(format!("rule-{:03}", i))
                    .with_condition(Condition::new("amount", Operator::Gt, 0))
            })
            .collect();
        let engine = engine_with_rules(rules);

        let ctx = transfer_context();
        let first: Vec<String> = engine
            .evaluate_rules(&ctx)
            .unwrap()
            .into_iter()
            .map(|r| r.rule_id)
            .collect();

        for _ in 0..5 {
            let next: Vec<String> = engine
                .evaluate_rules(&ctx)
                .unwrap()
                .into_iter()
                .map(|r| r.rule_id)
                .collect();
            assert_eq!(next, first);
        }
    }

    #[test]
    fn test_faulty_rule_does_not_abort_batch() {
        // boolean 字段与数字比较：该规则故障不匹配，其余规则照常评估
        let faulty = Rule::new("faulty")
            .with_id("rule-001")
            .with_condition(Condition::new("event.type", Operator::Gt, 100));
        let healthy = high_value_foreign("rule-002");

        let engine = engine_with_rules(vec![faulty, healthy]);
        let results = engine.evaluate_rules(&transfer_context()).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rule_id, "rule-002");
    }

    #[test]
    fn test_evaluate_candidates_respects_caller_order() {
        let engine = engine_with_rules(vec![]);
        let mut compiler = RuleCompiler::new();
        // 调用方自行准备候选列表时，结果遵循候选顺序
        let candidates = vec![
            compiler.compile(high_value_foreign("rule-z")).unwrap(),
            compiler.compile(high_value_foreign("rule-a")).unwrap(),
        ];

        let results = engine
            .evaluate_candidates(&candidates, &transfer_context())
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].rule_id, "rule-z");
        assert_eq!(results[1].rule_id, "rule-a");
    }

    #[test]
    fn test_test_rule_does_not_persist() {
        let engine = engine_with_rules(vec![]);
        let rule = high_value_foreign("rule-tmp");

        let result = engine.test_rule(rule, &transfer_context()).unwrap();

        assert!(result.matched);
        assert!(engine.store().is_empty());
    }

    #[test]
    fn test_test_rule_rejects_invalid_definition() {
        let engine = engine_with_rules(vec![]);
        // 畸形正则在编译期拒绝，不进入评估
        let rule = Rule::new("bad")
            .with_condition(Condition::new("email", Operator::Regex, "[invalid"));

        let result = engine.test_rule(rule, &transfer_context());
        assert!(matches!(result, Err(RuleError::CompileError(_))));
    }

    #[test]
    fn test_evaluate_set_in_declared_order() {
        let engine = engine_with_rules(vec![
            high_value_foreign("rule-a"),
            Rule::new("any_transfer")
                .with_id("rule-b")
                .with_condition(Condition::new("event.type", Operator::Equals, "TRANSFER"))
                .with_score(10.0),
        ]);
        // 集合声明顺序与 ID 排序相反，结果应遵循声明顺序
        engine
            .store()
            .load_set(RuleSet {
                id: "set-1".to_string(),
                ..RuleSet::new(
                    "transfer_rules",
                    vec!["rule-b".to_string(), "rule-a".to_string()],
                )
            })
            .unwrap();

        let evaluation = engine.evaluate_set("set-1", &transfer_context()).unwrap();

        assert_eq!(evaluation.results.len(), 2);
        assert_eq!(evaluation.results[0].rule_id, "rule-b");
        assert_eq!(evaluation.results[1].rule_id, "rule-a");
        assert_eq!(evaluation.total_score, 60.0);
        assert!(evaluation.skipped.is_empty());
    }

    #[test]
    fn test_evaluate_set_skips_dangling_and_disabled() {
        let engine = engine_with_rules(vec![
            high_value_foreign("rule-a"),
            high_value_foreign("rule-c").disabled(),
        ]);
        engine
            .store()
            .load_set(RuleSet {
                id: "set-1".to_string(),
                ..RuleSet::new(
                    "mixed",
                    vec![
                        "rule-a".to_string(),
                        "rule-deleted".to_string(),
                        "rule-c".to_string(),
                    ],
                )
            })
            .unwrap();

        let evaluation = engine.evaluate_set("set-1", &transfer_context()).unwrap();

        assert_eq!(evaluation.results.len(), 1);
        assert_eq!(evaluation.results[0].rule_id, "rule-a");
        assert_eq!(evaluation.skipped.len(), 2);
        assert_eq!(evaluation.skipped[0].rule_id, "rule-deleted");
        assert_eq!(evaluation.skipped[0].reason, SkipReason::NotFound);
        assert_eq!(evaluation.skipped[1].reason, SkipReason::Disabled);
    }

    #[test]
    fn test_evaluate_set_not_found() {
        let engine = engine_with_rules(vec![]);
        let result = engine.evaluate_set("missing", &transfer_context());
        assert!(matches!(result, Err(RuleError::RuleSetNotFound(_))));
    }

    #[test]
    fn test_evaluate_disabled_set_is_empty() {
        let engine = engine_with_rules(vec![high_value_foreign("rule-a")]);
        let mut set = RuleSet::new("disabled_set", vec!["rule-a".to_string()]);
        set.id = "set-1".to_string();
        set.enabled = false;
        engine.store().load_set(set).unwrap();

        let evaluation = engine.evaluate_set("set-1", &transfer_context()).unwrap();
        assert!(evaluation.results.is_empty());
        assert_eq!(evaluation.total_score, 0.0);
    }

    #[test]
    fn test_geo_rule_end_to_end() {
        let rule = Rule::new("near_origin")
            .with_id("rule-geo")
            .with_condition(Condition::new(
                "geo",
                Operator::GeoDistance,
                json!({"lat": 0.0, "lon": 0.0, "radius_km": 10.0}),
            ))
            .with_score(20.0)
            .with_actions(vec![Action::Alert]);

        let engine = engine_with_rules(vec![rule]);
        let results = engine.evaluate_rules(&transfer_context()).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].actions, vec![Action::Alert]);
    }
}
